//! Password protection
//!
//! Writes documents protected by the standard security handler (revision 4,
//! AES-128 for strings and streams, one password for both user and owner)
//! and opens documents protected by revisions 2 to 4 with RC4 or AES-128.
//! Revisions 5 and 6 (AES-256) and public-key handlers are refused.

use std::collections::btree_map::Entry;
use std::collections::BTreeSet;

use lopdf::xref::XrefEntry;
use lopdf::{Dictionary, Object, ObjectId, StringFormat};

use crate::crypt::{self, KeyParams};
use crate::document::{is_protected, name_of, parse, write, Document};
use crate::error::{PdfToolkitError, Result};
use crate::report::{Processed, Warning};

/// Every permission granted, reserved bits set.
const ALL_PERMISSIONS: i32 = -4;

const WRITE_REVISION: u32 = 4;
const WRITE_KEY_LENGTH: usize = 16;
const MIN_ENCRYPTED_VERSION: &str = "1.6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptMethod {
    Identity,
    Rc4,
    Aes128,
}

impl CryptMethod {
    fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"None" => Ok(CryptMethod::Identity),
            b"V2" => Ok(CryptMethod::Rc4),
            b"AESV2" => Ok(CryptMethod::Aes128),
            other => Err(PdfToolkitError::UnsupportedEncryption(format!(
                "crypt filter method {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn decrypt(self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(crypt::rc4_crypt(&crypt::object_key(file_key, id, false), data)),
            CryptMethod::Aes128 => {
                crypt::aes128_decrypt(&crypt::object_key(file_key, id, true), data)
            }
        }
    }
}

/// The parts of a standard `Encrypt` dictionary needed to open a document.
#[derive(Debug)]
struct StandardHandler {
    revision: u32,
    key_length: usize,
    owner_entry: Vec<u8>,
    user_entry: Vec<u8>,
    permissions: i32,
    file_id: Vec<u8>,
    encrypt_metadata: bool,
    strings: CryptMethod,
    streams: CryptMethod,
    /// Object holding the dictionary itself, never encrypted.
    dict_id: Option<ObjectId>,
}

impl StandardHandler {
    fn from_document(doc: &lopdf::Document) -> Result<Self> {
        let encrypt = doc
            .trailer
            .get(b"Encrypt")
            .map_err(|_| PdfToolkitError::Operation("No Encrypt in trailer".into()))?;
        let dict_id = encrypt.as_reference().ok();
        let dict = match dict_id {
            Some(id) => doc.get_dictionary(id),
            None => encrypt.as_dict(),
        }
        .map_err(|_| PdfToolkitError::Load("Encrypt dictionary not found".into()))?;

        let filter = dict.get(b"Filter").ok().and_then(name_of).unwrap_or_default();
        if filter != b"Standard" {
            return Err(PdfToolkitError::UnsupportedEncryption(format!(
                "security handler {}",
                String::from_utf8_lossy(filter)
            )));
        }

        let integer = |key: &[u8]| dict.get(key).ok().and_then(|o| o.as_i64().ok());
        let version = integer(b"V").unwrap_or(0);
        let revision = integer(b"R").unwrap_or(0);
        if !(2..=4).contains(&revision) {
            return Err(PdfToolkitError::UnsupportedEncryption(format!(
                "standard handler revision {}",
                revision
            )));
        }

        let string = |key: &[u8]| match dict.get(key) {
            Ok(Object::String(value, _)) => Ok(value.clone()),
            _ => Err(PdfToolkitError::Load(format!(
                "Encrypt dictionary has no {}",
                String::from_utf8_lossy(key)
            ))),
        };

        let (key_length, strings, streams) = match version {
            1 => (5, CryptMethod::Rc4, CryptMethod::Rc4),
            2 => {
                let bits = integer(b"Length").unwrap_or(40);
                (Self::key_bytes(bits)?, CryptMethod::Rc4, CryptMethod::Rc4)
            }
            4 => {
                let strings = Self::crypt_filter(dict, b"StrF")?;
                let streams = Self::crypt_filter(dict, b"StmF")?;
                let bits = integer(b"Length").unwrap_or(128);
                (Self::key_bytes(bits)?, strings, streams)
            }
            other => {
                return Err(PdfToolkitError::UnsupportedEncryption(format!(
                    "encryption algorithm V {}",
                    other
                )))
            }
        };

        let file_id = match doc.trailer.get(b"ID").and_then(Object::as_array) {
            Ok(ids) => match ids.first() {
                Some(Object::String(id, _)) => id.clone(),
                _ => Vec::new(),
            },
            Err(_) => Vec::new(),
        };

        Ok(Self {
            revision: revision as u32,
            key_length,
            owner_entry: string(b"O")?,
            user_entry: string(b"U")?,
            permissions: integer(b"P").unwrap_or(ALL_PERMISSIONS as i64) as i32,
            file_id,
            encrypt_metadata: !matches!(dict.get(b"EncryptMetadata"), Ok(Object::Boolean(false))),
            strings,
            streams,
            dict_id,
        })
    }

    fn key_bytes(bits: i64) -> Result<usize> {
        if !(40..=128).contains(&bits) || bits % 8 != 0 {
            return Err(PdfToolkitError::UnsupportedEncryption(format!(
                "key length {} bits",
                bits
            )));
        }
        Ok(bits as usize / 8)
    }

    /// Method of the crypt filter named by `StrF`/`StmF` (V4 only).
    fn crypt_filter(dict: &Dictionary, key: &[u8]) -> Result<CryptMethod> {
        let name = dict.get(key).ok().and_then(name_of).unwrap_or(b"Identity");
        if name == b"Identity" {
            return Ok(CryptMethod::Identity);
        }
        let method = dict
            .get(b"CF")
            .and_then(Object::as_dict)
            .and_then(|filters| filters.get(name))
            .and_then(Object::as_dict)
            .ok()
            .and_then(|filter| filter.get(b"CFM").ok())
            .and_then(name_of)
            .unwrap_or(b"None");
        CryptMethod::from_name(method)
    }

    fn params(&self) -> KeyParams<'_> {
        KeyParams {
            revision: self.revision,
            key_length: self.key_length,
            owner_entry: &self.owner_entry,
            permissions: self.permissions,
            file_id: &self.file_id,
            encrypt_metadata: self.encrypt_metadata,
        }
    }

    /// File key for `password`, tried as the user and then the owner password.
    fn authenticate(&self, password: &[u8]) -> Option<Vec<u8>> {
        let params = self.params();
        crypt::authenticate_user(password, &self.user_entry, &params)
            .or_else(|| crypt::authenticate_owner(password, &self.user_entry, &params))
    }

    /// Decrypts every object read from its own offset. Objects unpacked
    /// from object streams carry no encryption of their own and are left
    /// alone, as are object and cross-reference stream containers.
    fn decrypt_objects(
        &self,
        doc: &mut lopdf::Document,
        file_key: &[u8],
        packed: &BTreeSet<u32>,
    ) -> Result<()> {
        for (&id, object) in doc.objects.iter_mut() {
            if Some(id) == self.dict_id || packed.contains(&id.0) {
                continue;
            }
            match object {
                Object::Stream(stream) => {
                    let kind = stream.dict.get(b"Type").ok().and_then(name_of);
                    if kind == Some(&b"XRef"[..]) || kind == Some(&b"ObjStm"[..]) {
                        continue;
                    }
                    let skip_content = kind == Some(&b"Metadata"[..]) && !self.encrypt_metadata;
                    for (_, value) in stream.dict.iter_mut() {
                        map_strings(value, &mut |s| self.strings.decrypt(file_key, id, s))?;
                    }
                    if !skip_content {
                        let plain = self.streams.decrypt(file_key, id, &stream.content)?;
                        stream.set_content(plain);
                    }
                }
                other => map_strings(other, &mut |s| self.strings.decrypt(file_key, id, s))?,
            }
        }
        Ok(())
    }

    /// Unpack object streams the parser could not read while they were
    /// still encrypted. Each container is read again from `bytes` at its
    /// cross-reference offset, decrypted with its own object key and
    /// expanded. Returns the number of objects added.
    fn expand_object_streams(
        &self,
        doc: &mut lopdf::Document,
        bytes: &[u8],
        file_key: &[u8],
    ) -> Result<usize> {
        let containers: BTreeSet<u32> = doc
            .reference_table
            .entries
            .iter()
            .filter_map(|(&number, entry)| match *entry {
                XrefEntry::Compressed { container, .. } if !doc.objects.contains_key(&(number, 0)) => {
                    Some(container)
                }
                _ => None,
            })
            .collect();
        if containers.is_empty() {
            return Ok(0);
        }

        let mut source = lopdf::Document::new();
        source.reference_table = doc.reference_table.clone();
        let reader = lopdf::Reader {
            buffer: bytes,
            document: source,
        };

        let mut added = 0;
        for container in containers {
            let id = match doc.reference_table.get(container) {
                Some(&XrefEntry::Normal { generation, .. }) => (container, generation),
                _ => {
                    tracing::warn!(container, "object stream has no file offset");
                    continue;
                }
            };
            let mut object = match reader.get_object(id) {
                Ok(object) => object,
                Err(e) => {
                    tracing::warn!(container, error = %e, "object stream unreadable");
                    continue;
                }
            };
            let Ok(stream) = object.as_stream_mut() else {
                tracing::warn!(container, "object stream entry is not a stream");
                continue;
            };
            let plain = self.streams.decrypt(file_key, id, &stream.content)?;
            stream.set_content(plain);

            let unpacked = match lopdf::ObjectStream::new(stream) {
                Ok(unpacked) => unpacked,
                Err(e) => {
                    tracing::warn!(container, error = %e, "object stream unreadable");
                    continue;
                }
            };
            for (object_id, object) in unpacked.objects {
                if let Entry::Vacant(slot) = doc.objects.entry(object_id) {
                    slot.insert(object);
                    added += 1;
                }
            }
        }
        Ok(added)
    }
}

/// Apply `f` to every string inside `object`, storing results as hex.
fn map_strings<F>(object: &mut Object, f: &mut F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<Vec<u8>>,
{
    match object {
        Object::String(bytes, format) => {
            *bytes = f(bytes)?;
            *format = StringFormat::Hexadecimal;
        }
        Object::Array(items) => {
            for item in items {
                map_strings(item, f)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                map_strings(value, f)?;
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                map_strings(value, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn require_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(PdfToolkitError::Validation(
            "Password must not be empty".into(),
        ));
    }
    Ok(())
}

impl Document {
    /// Parse document bytes, unlocking them with `password` when protected.
    ///
    /// The result carries no encryption; serializing it writes plain output.
    pub fn load_with_password(bytes: &[u8], password: &str) -> Result<Document> {
        let mut inner = parse(bytes)?;
        if is_protected(&inner) {
            unlock(&mut inner, bytes, password)?;
        }
        Document::from_lopdf(inner)
    }
}

fn unlock(doc: &mut lopdf::Document, bytes: &[u8], password: &str) -> Result<()> {
    let handler = StandardHandler::from_document(doc)?;
    let file_key = handler
        .authenticate(password.as_bytes())
        .ok_or(PdfToolkitError::Authentication)?;

    let packed: BTreeSet<u32> = doc
        .reference_table
        .entries
        .iter()
        .filter(|(_, entry)| matches!(entry, XrefEntry::Compressed { .. }))
        .map(|(&number, _)| number)
        .collect();
    handler.decrypt_objects(doc, &file_key, &packed)?;
    let unpacked = handler.expand_object_streams(doc, bytes, &file_key)?;

    doc.trailer.remove(b"Encrypt");
    if let Some(id) = handler.dict_id {
        doc.objects.remove(&id);
    }
    tracing::debug!(
        revision = handler.revision,
        key_bits = handler.key_length * 8,
        unpacked,
        "document unlocked"
    );
    Ok(())
}

/// Whether `bytes` hold a password-protected document.
pub fn is_encrypted(bytes: &[u8]) -> Result<bool> {
    Ok(is_protected(&parse(bytes)?))
}

/// Protect `doc` with `password` and serialize it.
///
/// The same password is used as user and owner secret and every permission
/// is granted. An empty password is rejected with
/// [`PdfToolkitError::Validation`].
pub fn encrypt(doc: Document, password: &str) -> Result<Vec<u8>> {
    require_password(password)?;

    let mut inner = doc.into_prepared();
    let file_id = crypt::random_bytes::<16>()?;
    let password = password.as_bytes();

    let owner = crypt::owner_entry(password, password, WRITE_REVISION, WRITE_KEY_LENGTH);
    let params = KeyParams {
        revision: WRITE_REVISION,
        key_length: WRITE_KEY_LENGTH,
        owner_entry: &owner,
        permissions: ALL_PERMISSIONS,
        file_id: &file_id,
        encrypt_metadata: true,
    };
    let file_key = crypt::file_key(password, &params);
    let user = crypt::user_entry(&file_key, WRITE_REVISION, &file_id);

    let seal = |id: ObjectId, data: &[u8]| -> Result<Vec<u8>> {
        let iv = crypt::random_bytes::<{ crypt::AES_BLOCK }>()?;
        crypt::aes128_encrypt(&crypt::object_key(&file_key, id, true), iv, data)
    };
    let mut streams = 0usize;
    for (&id, object) in inner.objects.iter_mut() {
        match object {
            Object::Stream(stream) => {
                if stream.dict.get(b"Type").ok().and_then(name_of) == Some(&b"XRef"[..]) {
                    continue;
                }
                for (_, value) in stream.dict.iter_mut() {
                    map_strings(value, &mut |s| seal(id, s))?;
                }
                let sealed = seal(id, &stream.content)?;
                stream.set_content(sealed);
                streams += 1;
            }
            other => map_strings(other, &mut |s| seal(id, s))?,
        }
    }

    let encrypt_id = inner.add_object(encrypt_dictionary(owner, user));
    inner.trailer.set("Encrypt", Object::Reference(encrypt_id));
    let id_string = Object::String(file_id.to_vec(), StringFormat::Hexadecimal);
    inner
        .trailer
        .set("ID", Object::Array(vec![id_string.clone(), id_string]));
    if inner.version.as_str() < MIN_ENCRYPTED_VERSION {
        inner.version = MIN_ENCRYPTED_VERSION.to_string();
    }

    tracing::info!(streams, objects = inner.objects.len(), "document encrypted");
    write(&mut inner)
}

fn encrypt_dictionary(owner: Vec<u8>, user: Vec<u8>) -> Dictionary {
    let std_cf = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"CryptFilter".to_vec())),
        ("AuthEvent", Object::Name(b"DocOpen".to_vec())),
        ("CFM", Object::Name(b"AESV2".to_vec())),
        ("Length", Object::Integer(WRITE_KEY_LENGTH as i64)),
    ]);
    Dictionary::from_iter(vec![
        ("Filter", Object::Name(b"Standard".to_vec())),
        ("V", Object::Integer(4)),
        ("R", Object::Integer(WRITE_REVISION as i64)),
        ("Length", Object::Integer(WRITE_KEY_LENGTH as i64 * 8)),
        (
            "CF",
            Object::Dictionary(Dictionary::from_iter(vec![("StdCF", Object::Dictionary(std_cf))])),
        ),
        ("StmF", Object::Name(b"StdCF".to_vec())),
        ("StrF", Object::Name(b"StdCF".to_vec())),
        ("O", Object::String(owner, StringFormat::Hexadecimal)),
        ("U", Object::String(user, StringFormat::Hexadecimal)),
        ("P", Object::Integer(ALL_PERMISSIONS as i64)),
        ("EncryptMetadata", Object::Boolean(true)),
    ])
}

/// Open a protected document and copy its pages into a plain one.
///
/// Input without encryption is loaded as is and reported with
/// [`Warning::NotEncrypted`].
pub fn decrypt(bytes: &[u8], password: &str) -> Result<Processed<Document>> {
    let mut inner = parse(bytes)?;
    if !is_protected(&inner) {
        let doc = Document::from_lopdf(inner)?;
        return Ok(Processed::new(doc, vec![Warning::NotEncrypted.logged()]));
    }

    unlock(&mut inner, bytes, password)?;
    let unlocked = Document::from_lopdf(inner)?;
    let indices: Vec<usize> = (0..unlocked.page_count()).collect();
    let plain = Document::from_pages(&[(&unlocked, indices.as_slice())])?;
    tracing::info!(pages = plain.page_count(), "document decrypted");
    Ok(Processed::new(plain, Vec::new()))
}

/// Load, protect and serialize.
pub fn encrypt_document(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    require_password(password)?;
    encrypt(Document::load(bytes)?, password)
}

/// Load, unlock and serialize.
pub fn decrypt_document(bytes: &[u8], password: &str) -> Result<Processed<Vec<u8>>> {
    let Processed { value, warnings } = decrypt(bytes, password)?;
    Ok(Processed::new(value.to_bytes()?, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::{create_test_pdf, page_text, save, shared_font_doc};
    use pretty_assertions::assert_eq;

    fn protected(pages: usize, prefix: &str, password: &str) -> Vec<u8> {
        let doc = Document::load(&create_test_pdf(pages, prefix)).unwrap();
        encrypt(doc, password).unwrap()
    }

    #[test]
    fn test_encrypt_round_trip() {
        let sealed = protected(3, "Sec", "pw");
        let opened = decrypt(&sealed, "pw").unwrap();
        assert!(opened.warnings.is_empty());
        assert_eq!(opened.value.page_count(), 3);
        for i in 0..3 {
            assert!(page_text(&opened.value, i).contains(&format!("Sec-Page-{}", i + 1)));
        }
    }

    #[test]
    fn test_encrypted_output_hides_content() {
        let sealed = protected(1, "Hidden", "pw");
        assert!(!String::from_utf8_lossy(&sealed).contains("Hidden-Page-1"));
        assert!(is_encrypted(&sealed).unwrap());
    }

    #[test]
    fn test_encrypted_output_declares_handler() {
        let sealed = protected(1, "Dict", "pw");
        let raw = lopdf::Document::load_mem(&sealed).unwrap();
        let handler = StandardHandler::from_document(&raw).unwrap();
        assert_eq!(handler.revision, 4);
        assert_eq!(handler.key_length, 16);
        assert_eq!(handler.strings, CryptMethod::Aes128);
        assert_eq!(handler.streams, CryptMethod::Aes128);
        assert_eq!(handler.file_id.len(), 16);
        assert!(raw.version.as_str() >= "1.6");
    }

    #[test]
    fn test_two_encryptions_use_different_ids() {
        let a = lopdf::Document::load_mem(&protected(1, "Id", "pw")).unwrap();
        let b = lopdf::Document::load_mem(&protected(1, "Id", "pw")).unwrap();
        let id = |doc: &lopdf::Document| StandardHandler::from_document(doc).unwrap().file_id;
        assert_ne!(id(&a), id(&b));
    }

    #[test]
    fn test_wrong_password_is_authentication_error() {
        let sealed = protected(2, "Sec", "pw");
        assert!(matches!(
            decrypt(&sealed, "wrong"),
            Err(PdfToolkitError::Authentication)
        ));
    }

    #[test]
    fn test_empty_password_rejected() {
        let doc = Document::load(&create_test_pdf(1, "E")).unwrap();
        assert!(matches!(
            encrypt(doc, ""),
            Err(PdfToolkitError::Validation(_))
        ));
    }

    #[test]
    fn test_plain_load_of_protected_document_requires_password() {
        let sealed = protected(1, "Req", "pw");
        assert!(matches!(
            Document::load(&sealed),
            Err(PdfToolkitError::EncryptionRequired)
        ));
    }

    #[test]
    fn test_load_with_password_unlocks_in_place() {
        let sealed = protected(2, "InPlace", "pw");
        let doc = Document::load_with_password(&sealed, "pw").unwrap();
        assert_eq!(doc.page_count(), 2);
        assert!(page_text(&doc, 0).contains("InPlace-Page-1"));
        assert!(!is_protected(&doc.inner));

        let plain = create_test_pdf(1, "Plain");
        assert_eq!(Document::load_with_password(&plain, "x").unwrap().page_count(), 1);
    }

    #[test]
    fn test_decrypt_plain_document_warns() {
        let plain = create_test_pdf(2, "Plain");
        let result = decrypt(&plain, "anything").unwrap();
        assert_eq!(result.warnings, vec![Warning::NotEncrypted]);
        assert_eq!(result.value.page_count(), 2);
    }

    #[test]
    fn test_encrypting_protected_input_requires_password() {
        let sealed = protected(1, "Twice", "pw");
        assert!(matches!(
            encrypt_document(&sealed, "other"),
            Err(PdfToolkitError::EncryptionRequired)
        ));
    }

    #[test]
    fn test_decrypted_output_is_plain() {
        let sealed = protected(2, "Out", "pw");
        let out = decrypt_document(&sealed, "pw").unwrap();
        assert!(!is_encrypted(&out.value).unwrap());
        let doc = Document::load(&out.value).unwrap();
        assert!(page_text(&doc, 1).contains("Out-Page-2"));
    }

    /// Hand-built R3 RC4 file, encrypted the way older writers do it.
    fn rc4_protected(password: &[u8]) -> Vec<u8> {
        let mut raw = shared_font_doc(1, "Legacy");
        let file_id = [0x11u8; 16];
        let owner = crypt::owner_entry(password, password, 3, 16);
        let params = KeyParams {
            revision: 3,
            key_length: 16,
            owner_entry: &owner,
            permissions: ALL_PERMISSIONS,
            file_id: &file_id,
            encrypt_metadata: true,
        };
        let key = crypt::file_key(password, &params);
        let user = crypt::user_entry(&key, 3, &file_id);

        for (&id, object) in raw.objects.iter_mut() {
            if let Object::Stream(stream) = object {
                let sealed = crypt::rc4_crypt(&crypt::object_key(&key, id, false), &stream.content);
                stream.set_content(sealed);
            } else {
                map_strings(object, &mut |s| {
                    Ok(crypt::rc4_crypt(&crypt::object_key(&key, id, false), s))
                })
                .unwrap();
            }
        }
        let encrypt_id = raw.add_object(Dictionary::from_iter(vec![
            ("Filter", Object::Name(b"Standard".to_vec())),
            ("V", Object::Integer(2)),
            ("R", Object::Integer(3)),
            ("Length", Object::Integer(128)),
            ("O", Object::String(owner, StringFormat::Hexadecimal)),
            ("U", Object::String(user, StringFormat::Hexadecimal)),
            ("P", Object::Integer(ALL_PERMISSIONS as i64)),
        ]));
        raw.trailer.set("Encrypt", Object::Reference(encrypt_id));
        raw.trailer.set(
            "ID",
            Object::Array(vec![
                Object::String(file_id.to_vec(), StringFormat::Hexadecimal),
                Object::String(file_id.to_vec(), StringFormat::Hexadecimal),
            ]),
        );
        save(&mut raw)
    }

    #[test]
    fn test_decrypt_legacy_rc4() {
        let sealed = rc4_protected(b"legacy");
        let opened = decrypt(&sealed, "legacy").unwrap();
        assert!(page_text(&opened.value, 0).contains("Legacy-Page-1"));
        assert!(matches!(
            decrypt(&sealed, "nope"),
            Err(PdfToolkitError::Authentication)
        ));
    }

    fn push_object(out: &mut Vec<u8>, number: u32, dict: &str, data: Option<&[u8]>) -> u32 {
        let offset = out.len() as u32;
        out.extend_from_slice(format!("{} 0 obj\n{}", number, dict).as_bytes());
        if let Some(data) = data {
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\nendstream");
        }
        out.extend_from_slice(b"\nendobj\n");
        offset
    }

    /// Hand-built R4 AES file whose catalog and page tree sit in an
    /// encrypted object stream, indexed by a cross-reference stream.
    fn packed_protected(password: &[u8]) -> Vec<u8> {
        let file_id = [0x42u8; 16];
        let owner = crypt::owner_entry(password, password, 4, 16);
        let params = KeyParams {
            revision: 4,
            key_length: 16,
            owner_entry: &owner,
            permissions: ALL_PERMISSIONS,
            file_id: &file_id,
            encrypt_metadata: true,
        };
        let key = crypt::file_key(password, &params);
        let user = crypt::user_entry(&key, 4, &file_id);
        let seal = |id: ObjectId, data: &[u8]| {
            crypt::aes128_encrypt(&crypt::object_key(&key, id, true), [7; crypt::AES_BLOCK], data)
                .unwrap()
        };
        let hex = |bytes: &[u8]| bytes.iter().map(|b| format!("{:02X}", b)).collect::<String>();

        let members = [
            (2, "<< /Type /Catalog /Pages 3 0 R >>"),
            (3, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>"),
            (4, "<< /Type /Page /Parent 3 0 R /MediaBox [0 0 200 200] /Contents 5 0 R >>"),
        ];
        let mut index = String::new();
        let mut body = String::new();
        for (number, text) in members {
            index.push_str(&format!("{} {} ", number, body.len()));
            body.push_str(text);
            body.push('\n');
        }
        let packed = seal((1, 0), format!("{}{}", index, body).as_bytes());
        let content = seal((5, 0), b"BT /F1 12 Tf 20 100 Td (Packed-Page-1) Tj ET");

        let mut out = b"%PDF-1.6\n".to_vec();
        let packed_at = push_object(
            &mut out,
            1,
            &format!(
                "<< /Type /ObjStm /N 3 /First {} /Length {} >>",
                index.len(),
                packed.len()
            ),
            Some(&packed),
        );
        let content_at = push_object(
            &mut out,
            5,
            &format!("<< /Length {} >>", content.len()),
            Some(&content),
        );
        let encrypt_at = push_object(
            &mut out,
            6,
            &format!(
                "<< /Filter /Standard /V 4 /R 4 /Length 128 \
                 /CF << /StdCF << /Type /CryptFilter /CFM /AESV2 /AuthEvent /DocOpen /Length 16 >> >> \
                 /StmF /StdCF /StrF /StdCF /O <{}> /U <{}> /P -4 >>",
                hex(&owner),
                hex(&user)
            ),
            None,
        );
        let xref_at = out.len() as u32;

        // W [1 4 2]: type, offset or container, generation or index
        let mut entries = Vec::new();
        let mut entry = |kind: u8, field: u32, tail: u16| {
            entries.push(kind);
            entries.extend_from_slice(&field.to_be_bytes());
            entries.extend_from_slice(&tail.to_be_bytes());
        };
        entry(0, 0, 65535);
        entry(1, packed_at, 0);
        entry(2, 1, 0);
        entry(2, 1, 1);
        entry(2, 1, 2);
        entry(1, content_at, 0);
        entry(1, encrypt_at, 0);
        entry(1, xref_at, 0);
        push_object(
            &mut out,
            7,
            &format!(
                "<< /Type /XRef /Size 8 /W [1 4 2] /Root 2 0 R /Encrypt 6 0 R \
                 /ID [<{id}> <{id}>] /Length {} >>",
                entries.len(),
                id = hex(&file_id)
            ),
            Some(&entries),
        );
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_at).as_bytes());
        out
    }

    #[test]
    fn test_decrypt_unpacks_encrypted_object_streams() {
        let sealed = packed_protected(b"pw");
        assert!(is_encrypted(&sealed).unwrap());

        let opened = decrypt(&sealed, "pw").unwrap();
        assert_eq!(opened.value.page_count(), 1);
        assert!(page_text(&opened.value, 0).contains("Packed-Page-1"));

        let in_place = Document::load_with_password(&sealed, "pw").unwrap();
        assert_eq!(in_place.page_count(), 1);
        assert!(page_text(&in_place, 0).contains("Packed-Page-1"));
    }

    #[test]
    fn test_aes256_is_unsupported() {
        let mut raw = shared_font_doc(1, "Aes256");
        let encrypt_id = raw.add_object(Dictionary::from_iter(vec![
            ("Filter", Object::Name(b"Standard".to_vec())),
            ("V", Object::Integer(5)),
            ("R", Object::Integer(6)),
            ("O", Object::String(vec![0; 48], StringFormat::Hexadecimal)),
            ("U", Object::String(vec![0; 48], StringFormat::Hexadecimal)),
            ("P", Object::Integer(-4)),
        ]));
        raw.trailer.set("Encrypt", Object::Reference(encrypt_id));
        let bytes = save(&mut raw);
        assert!(matches!(
            decrypt(&bytes, "pw"),
            Err(PdfToolkitError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn test_public_key_handler_is_unsupported() {
        let mut raw = shared_font_doc(1, "PubSec");
        let encrypt_id = raw.add_object(Dictionary::from_iter(vec![
            ("Filter", Object::Name(b"Adobe.PubSec".to_vec())),
            ("V", Object::Integer(4)),
        ]));
        raw.trailer.set("Encrypt", Object::Reference(encrypt_id));
        let bytes = save(&mut raw);
        let err = decrypt(&bytes, "pw").unwrap_err();
        assert!(err.to_string().contains("Adobe.PubSec"));
    }
}
