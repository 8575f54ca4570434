use crate::error::ProtectedDataError;
use crate::machine_id::MachineId;
use openssl::symm::Cipher;
use sha2::{Digest, Sha256};

/// File magic of the protected data format
pub const STORE_MAGIC: &[u8; 4] = b"PDS2";
/// Size of the per-file salt (128 bits = 16 bytes)
pub const SALT_SIZE: usize = 16;
/// Size of AES-256 key (256 bits = 32 bytes)
pub const AES_GCM_256_KEY_SIZE: usize = 32;
/// Size of AES-GCM nonce (96 bits = 12 bytes)
pub const AES_GCM_NONCE_SIZE: usize = 12;
/// Size of AES-GCM authentication tag (128 bits = 16 bytes)
pub const AES_GCM_TAG_SIZE: usize = 16;
/// Bytes before the ciphertext
pub const HEADER_SIZE: usize = STORE_MAGIC.len() + SALT_SIZE + AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE;

/// Sealed protected data blob
///
/// Layout: `magic | salt ^ machine id | nonce | tag | ciphertext`. The key is
/// `SHA-256(salt || machine id)` and the magic is authenticated as AAD.
pub struct SealedData {
    masked_salt: [u8; SALT_SIZE],
    nonce: [u8; AES_GCM_NONCE_SIZE],
    tag: [u8; AES_GCM_TAG_SIZE],
    ciphertext: Vec<u8>,
}

fn derive_key(salt: &[u8], machine: &MachineId) -> [u8; AES_GCM_256_KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(machine.expose());
    hasher.finalize().into()
}

impl SealedData {
    pub fn seal(plaintext: &[u8], machine: &MachineId) -> Result<SealedData, ProtectedDataError> {
        let mut salt = [0u8; SALT_SIZE];
        openssl::rand::rand_bytes(&mut salt)?;
        let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
        openssl::rand::rand_bytes(&mut nonce)?;

        let key = derive_key(&salt, machine);
        let mut tag = [0u8; AES_GCM_TAG_SIZE];
        let ciphertext = openssl::symm::encrypt_aead(
            Cipher::aes_256_gcm(),
            &key,
            Some(&nonce),
            STORE_MAGIC,
            plaintext,
            &mut tag,
        )?;

        machine.xor_in_place(&mut salt);
        Ok(SealedData {
            masked_salt: salt,
            nonce,
            tag,
            ciphertext,
        })
    }

    pub fn open(&self, machine: &MachineId) -> Result<Vec<u8>, ProtectedDataError> {
        let mut salt = self.masked_salt;
        machine.xor_in_place(&mut salt);
        let key = derive_key(&salt, machine);
        openssl::symm::decrypt_aead(
            Cipher::aes_256_gcm(),
            &key,
            Some(&self.nonce),
            STORE_MAGIC,
            &self.ciphertext,
            &self.tag,
        )
        .map_err(|_| ProtectedDataError::Decrypt)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        data.extend_from_slice(STORE_MAGIC);
        data.extend_from_slice(&self.masked_salt);
        data.extend_from_slice(&self.nonce);
        data.extend_from_slice(&self.tag);
        data.extend_from_slice(&self.ciphertext);
        data
    }

    pub fn deserialize(serialized_data: &[u8]) -> Result<SealedData, ProtectedDataError> {
        if serialized_data.len() >= STORE_MAGIC.len() && !serialized_data.starts_with(STORE_MAGIC)
        {
            return Err(ProtectedDataError::UnknownFormat);
        }
        if serialized_data.len() < HEADER_SIZE {
            return Err(ProtectedDataError::TooShort(serialized_data.len()));
        }

        let (_, rest) = serialized_data.split_at(STORE_MAGIC.len());
        let (salt, rest) = rest.split_at(SALT_SIZE);
        let (nonce, rest) = rest.split_at(AES_GCM_NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(AES_GCM_TAG_SIZE);

        let mut sealed = SealedData {
            masked_salt: [0u8; SALT_SIZE],
            nonce: [0u8; AES_GCM_NONCE_SIZE],
            tag: [0u8; AES_GCM_TAG_SIZE],
            ciphertext: ciphertext.to_vec(),
        };
        sealed.masked_salt.copy_from_slice(salt);
        sealed.nonce.copy_from_slice(nonce);
        sealed.tag.copy_from_slice(tag);
        Ok(sealed)
    }
}
