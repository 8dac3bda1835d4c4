//! Shared fixtures for tagcrypt-engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tagcrypt_crypto::{
    CipherEngine, CryptoResult, Dek, KeyWrapper, LocalKeyWrapper, MasterKey, Pepper,
    SlowHashParams, XChaChaEngine,
};
use tagcrypt_engine::{
    FieldDef, FieldType, KeyManager, Naming, Record, RecordProcessor, Value, ValueError,
};

pub const ALIAS: &str = "tagcrypt-test";

/// Argon2id costs small enough for tests.
pub fn cheap_params() -> SlowHashParams {
    SlowHashParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
        ..SlowHashParams::default()
    }
}

/// Delegates to [`XChaChaEngine`] and counts every call.
#[derive(Default)]
pub struct CountingCipher {
    inner: XChaChaEngine,
    pub encrypts: AtomicUsize,
    pub decrypts: AtomicUsize,
    pub fast_hashes: AtomicUsize,
    pub slow_hashes: AtomicUsize,
}

impl CountingCipher {
    pub fn total(&self) -> usize {
        self.encrypts.load(Ordering::SeqCst)
            + self.decrypts.load(Ordering::SeqCst)
            + self.fast_hashes.load(Ordering::SeqCst)
            + self.slow_hashes.load(Ordering::SeqCst)
    }
}

impl CipherEngine for CountingCipher {
    fn encrypt(&self, plaintext: &[u8], key: &Dek) -> CryptoResult<Vec<u8>> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.encrypt(plaintext, key)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &Dek) -> CryptoResult<Vec<u8>> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt(ciphertext, key)
    }

    fn hash_fast(&self, data: &[u8]) -> String {
        self.fast_hashes.fetch_add(1, Ordering::SeqCst);
        self.inner.hash_fast(data)
    }

    fn hash_slow(
        &self,
        data: &[u8],
        params: &SlowHashParams,
        pepper: &Pepper,
    ) -> CryptoResult<String> {
        self.slow_hashes.fetch_add(1, Ordering::SeqCst);
        self.inner.hash_slow(data, params, pepper)
    }

    fn verify_slow(&self, data: &[u8], encoded: &str, pepper: &Pepper) -> CryptoResult<bool> {
        self.inner.verify_slow(data, encoded, pepper)
    }
}

pub struct Harness {
    pub processor: RecordProcessor,
    pub cipher: Arc<CountingCipher>,
    pub wrapper: Arc<LocalKeyWrapper>,
}

pub async fn harness(naming: Naming) -> Harness {
    let wrapper = Arc::new(LocalKeyWrapper::new());
    wrapper.insert_key(format!("{ALIAS}-v1"), MasterKey::generate().unwrap());
    wrapper.set_alias(ALIAS, &format!("{ALIAS}-v1")).unwrap();
    let keys = KeyManager::connect(wrapper.clone(), ALIAS).await.unwrap();

    let cipher = Arc::new(CountingCipher::default());
    let processor = RecordProcessor::builder()
        .cipher(cipher.clone())
        .keys(Arc::new(keys))
        .pepper(Pepper::generate().unwrap())
        .hash_params(cheap_params())
        .naming(naming)
        .build()
        .unwrap();

    Harness {
        processor,
        cipher,
        wrapper,
    }
}

/// A local key wrapper whose `wrap` takes `delay` to answer.
pub struct SlowWrapper {
    pub inner: LocalKeyWrapper,
    pub delay: Duration,
}

#[async_trait]
impl KeyWrapper for SlowWrapper {
    async fn key_id(&self, alias: &str) -> CryptoResult<String> {
        self.inner.key_id(alias).await
    }

    async fn wrap(&self, key_id: &str, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        tokio::time::sleep(self.delay).await;
        self.inner.wrap(key_id, plaintext).await
    }

    async fn unwrap(&self, key_id: &str, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.inner.unwrap(key_id, ciphertext).await
    }
}

/// A Pascal-named processor whose DEK wrapping is slow.
pub async fn slow_wrap_processor(delay: Duration) -> RecordProcessor {
    let inner = LocalKeyWrapper::new();
    inner.insert_key(format!("{ALIAS}-v1"), MasterKey::generate().unwrap());
    inner.set_alias(ALIAS, &format!("{ALIAS}-v1")).unwrap();
    let keys = KeyManager::connect(Arc::new(SlowWrapper { inner, delay }), ALIAS)
        .await
        .unwrap();
    RecordProcessor::builder()
        .keys(Arc::new(keys))
        .pepper(Pepper::generate().unwrap())
        .hash_params(cheap_params())
        .naming(Naming::Pascal)
        .build()
        .unwrap()
}

/// A record using the stored-data (Pascal) field names, with a hand-written
/// `Record` implementation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Customer {
    pub email: String,
    pub email_encrypted: Vec<u8>,
    pub email_hash: String,
    pub ssn: String,
    pub ssn_hash_secure: String,
    pub dek_encrypted: Vec<u8>,
    pub key_version: i64,
}

const CUSTOMER_FIELDS: &[FieldDef] = &[
    FieldDef::typed::<String>("Email", Some("encrypt,hash_basic")),
    FieldDef::typed::<Vec<u8>>("EmailEncrypted", None),
    FieldDef::typed::<String>("EmailHash", None),
    FieldDef::typed::<String>("SSN", Some("hash_secure")),
    FieldDef::typed::<String>("SSNHashSecure", None),
    FieldDef::typed::<Vec<u8>>("DEKEncrypted", None),
    FieldDef::typed::<i64>("KeyVersion", None),
];

impl Customer {
    pub fn new(email: &str, ssn: &str) -> Self {
        Self {
            email: email.to_string(),
            ssn: ssn.to_string(),
            ..Default::default()
        }
    }
}

impl Record for Customer {
    fn fields(&self) -> &[FieldDef] {
        CUSTOMER_FIELDS
    }

    fn get(&self, name: &str) -> Option<Value> {
        let value = match name {
            "Email" => self.email.to_value(),
            "EmailEncrypted" => self.email_encrypted.to_value(),
            "EmailHash" => self.email_hash.to_value(),
            "SSN" => self.ssn.to_value(),
            "SSNHashSecure" => self.ssn_hash_secure.to_value(),
            "DEKEncrypted" => self.dek_encrypted.to_value(),
            "KeyVersion" => self.key_version.to_value(),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), ValueError> {
        let convert = |e: ValueError| e.in_field(name);
        match name {
            "Email" => self.email = String::from_value(value).map_err(convert)?,
            "EmailEncrypted" => self.email_encrypted = Vec::<u8>::from_value(value).map_err(convert)?,
            "EmailHash" => self.email_hash = String::from_value(value).map_err(convert)?,
            "SSN" => self.ssn = String::from_value(value).map_err(convert)?,
            "SSNHashSecure" => self.ssn_hash_secure = String::from_value(value).map_err(convert)?,
            "DEKEncrypted" => self.dek_encrypted = Vec::<u8>::from_value(value).map_err(convert)?,
            "KeyVersion" => self.key_version = i64::from_value(value).map_err(convert)?,
            _ => return Err(ValueError::UnknownField(name.to_string())),
        }
        Ok(())
    }
}

/// A record missing `EmailHash`, the companion its tag requires.
#[derive(Debug, Default, Clone)]
pub struct Broken {
    pub email: String,
    pub email_encrypted: Vec<u8>,
}

impl Record for Broken {
    fn fields(&self) -> &[FieldDef] {
        const FIELDS: &[FieldDef] = &[
            FieldDef::typed::<String>("Email", Some("encrypt,hash_basic")),
            FieldDef::typed::<Vec<u8>>("EmailEncrypted", None),
        ];
        FIELDS
    }

    fn get(&self, name: &str) -> Option<Value> {
        match name {
            "Email" => Some(self.email.to_value()),
            "EmailEncrypted" => Some(self.email_encrypted.to_value()),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), ValueError> {
        match name {
            "Email" => self.email = String::from_value(value)?,
            "EmailEncrypted" => self.email_encrypted = Vec::<u8>::from_value(value)?,
            _ => return Err(ValueError::UnknownField(name.to_string())),
        }
        Ok(())
    }
}

/// Matches the encoded secure-hash format.
pub fn is_phc_argon2id(encoded: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    parts.len() == 6
        && parts[0].is_empty()
        && parts[1] == "argon2id"
        && parts[2] == "v=19"
        && parts[3].starts_with("m=")
        && parts[3].contains(",t=")
        && parts[3].contains(",p=")
        && !parts[4].is_empty()
        && !parts[5].is_empty()
        && !parts[4].contains('=')
        && !parts[5].contains('=')
}
