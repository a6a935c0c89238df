use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, Utc};
use mesh_a2a_core::{A2aError, Result};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use rustls_pki_types::PrivatePkcs8KeyDer;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::AgentIdentity;

const RSA_BITS: usize = 2048;

/// Identity document, private key, and certificate held in memory.
#[derive(Clone)]
struct LoadedIdentity {
    identity: AgentIdentity,
    private_key: RsaPrivateKey,
    cert_pem: String,
}

/// Creates, persists, and loads per-agent keypairs and self-signed
/// certificates; signs and verifies bytes on behalf of agents.
///
/// On-disk layout under the storage directory:
/// `<id>_identity.json`, `<id>_private.pem`, `<id>_cert.pem`.
pub struct IdentityStore {
    storage_dir: PathBuf,
    loaded: Mutex<HashMap<String, LoadedIdentity>>,
}

impl IdentityStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir)?;
        Ok(Self {
            storage_dir,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Generate a keypair and self-signed certificate for `agent_id`, persist
    /// all three identity files atomically, and return the identity document.
    pub fn create_identity(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
        metadata: Map<String, Value>,
        validity_days: u32,
    ) -> Result<AgentIdentity> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| A2aError::IdentityCorrupt(format!("key generation: {e}")))?;
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| A2aError::IdentityCorrupt(format!("public key encoding: {e}")))?;

        let cert_pem = self_signed_cert(&private_key, agent_id, validity_days)?;

        let now = Utc::now();
        let identity = AgentIdentity {
            agent_id: agent_id.to_string(),
            did: AgentIdentity::did_for(agent_id),
            public_key: public_key_pem,
            capabilities,
            metadata,
            created_at: now,
            expires_at: Some(now + Duration::days(i64::from(validity_days))),
        };

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| A2aError::IdentityCorrupt(format!("private key encoding: {e}")))?;

        write_atomic(
            &self.identity_path(agent_id),
            serde_json::to_vec_pretty(&identity)?.as_slice(),
        )?;
        write_atomic(&self.key_path(agent_id), private_pem.as_bytes())?;
        write_atomic(&self.cert_path(agent_id), cert_pem.as_bytes())?;

        self.loaded.lock().unwrap().insert(
            agent_id.to_string(),
            LoadedIdentity {
                identity: identity.clone(),
                private_key,
                cert_pem,
            },
        );

        info!(agent_id, "created identity");
        Ok(identity)
    }

    /// Load an identity from storage. Absent files are not an error; present
    /// but unparsable files are.
    pub fn load_identity(&self, agent_id: &str) -> Result<Option<AgentIdentity>> {
        let identity_path = self.identity_path(agent_id);
        if !identity_path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&identity_path)?;
        let identity: AgentIdentity = serde_json::from_str(&raw)
            .map_err(|e| A2aError::IdentityCorrupt(format!("{}: {e}", identity_path.display())))?;

        let key_pem = fs::read_to_string(self.key_path(agent_id))
            .map_err(|_| A2aError::IdentityCorrupt(format!("missing private key for {agent_id}")))?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&key_pem)
            .map_err(|e| A2aError::IdentityCorrupt(format!("private key for {agent_id}: {e}")))?;
        let cert_pem = fs::read_to_string(self.cert_path(agent_id))
            .map_err(|_| A2aError::IdentityCorrupt(format!("missing certificate for {agent_id}")))?;

        debug!(agent_id, "loaded identity from storage");
        self.loaded.lock().unwrap().insert(
            agent_id.to_string(),
            LoadedIdentity {
                identity: identity.clone(),
                private_key,
                cert_pem,
            },
        );
        Ok(Some(identity))
    }

    /// Fetch from the in-memory cache, falling back to storage.
    pub fn get_identity(&self, agent_id: &str) -> Result<Option<AgentIdentity>> {
        if let Some(loaded) = self.loaded.lock().unwrap().get(agent_id) {
            return Ok(Some(loaded.identity.clone()));
        }
        self.load_identity(agent_id)
    }

    /// Replace the capability set on a stored identity and re-persist it.
    pub fn update_capabilities(&self, agent_id: &str, capabilities: Vec<String>) -> Result<()> {
        let mut loaded = self.loaded.lock().unwrap();
        let entry = loaded
            .get_mut(agent_id)
            .ok_or_else(|| A2aError::IdentityMissing(agent_id.to_string()))?;
        entry.identity.capabilities = capabilities;
        write_atomic(
            &self.identity_path(agent_id),
            serde_json::to_vec_pretty(&entry.identity)?.as_slice(),
        )
    }

    /// Sign bytes with the agent's private key: RSA-PSS with MGF1-SHA256 and
    /// the maximum salt length, over the SHA-256 digest, hex-encoded.
    pub fn sign_data(&self, agent_id: &str, data: &[u8]) -> Result<String> {
        self.ensure_loaded(agent_id)?;
        let loaded = self.loaded.lock().unwrap();
        let entry = loaded
            .get(agent_id)
            .ok_or_else(|| A2aError::IdentityMissing(agent_id.to_string()))?;

        let digest = Sha256::digest(data);
        let padding = max_salt_pss(&entry.private_key);
        let signature = entry
            .private_key
            .sign_with_rng(&mut rand::thread_rng(), padding, &digest)
            .map_err(|e| A2aError::IdentityCorrupt(format!("signing failed: {e}")))?;
        Ok(hex::encode(signature))
    }

    /// Verify a hex signature against the agent's public key. An unknown
    /// agent or malformed signature verifies as false.
    pub fn verify_signature(&self, agent_id: &str, data: &[u8], signature_hex: &str) -> bool {
        if self.ensure_loaded(agent_id).is_err() {
            return false;
        }
        let loaded = self.loaded.lock().unwrap();
        let Some(entry) = loaded.get(agent_id) else {
            return false;
        };
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };

        let digest = Sha256::digest(data);
        let padding = max_salt_pss(&entry.private_key);
        RsaPublicKey::from(&entry.private_key)
            .verify(padding, &digest, &signature)
            .is_ok()
    }

    /// PEM certificate for an agent, if one is stored.
    pub fn certificate_pem(&self, agent_id: &str) -> Result<Option<String>> {
        self.ensure_loaded(agent_id)?;
        Ok(self
            .loaded
            .lock()
            .unwrap()
            .get(agent_id)
            .map(|entry| entry.cert_pem.clone()))
    }

    fn ensure_loaded(&self, agent_id: &str) -> Result<()> {
        if self.loaded.lock().unwrap().contains_key(agent_id) {
            return Ok(());
        }
        self.load_identity(agent_id)?;
        Ok(())
    }

    fn identity_path(&self, agent_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{agent_id}_identity.json"))
    }

    fn key_path(&self, agent_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{agent_id}_private.pem"))
    }

    fn cert_path(&self, agent_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{agent_id}_cert.pem"))
    }
}

/// PSS with the maximum salt for a key: modulus length minus digest length
/// minus 2 (222 bytes for RSA-2048 with SHA-256).
fn max_salt_pss(key: &RsaPrivateKey) -> Pss {
    Pss::new_with_salt::<Sha256>(key.size() - Sha256::output_size() - 2)
}

/// Self-signed X.509 certificate over the agent's RSA key, CN
/// `agent-<id prefix>`, SAN `localhost`.
fn self_signed_cert(
    private_key: &RsaPrivateKey,
    agent_id: &str,
    validity_days: u32,
) -> Result<String> {
    let pkcs8 = private_key
        .to_pkcs8_der()
        .map_err(|e| A2aError::IdentityCorrupt(format!("private key DER: {e}")))?;
    let key_der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes().to_vec());
    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(&key_der, &PKCS_RSA_SHA256)
        .map_err(|e| A2aError::IdentityCorrupt(format!("certificate key: {e}")))?;

    let prefix: String = agent_id.chars().take(8).collect();
    let mut params = CertificateParams::new(vec!["localhost".to_string()])
        .map_err(|e| A2aError::IdentityCorrupt(format!("certificate params: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("agent-{prefix}"));
    params.distinguished_name = dn;
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(i64::from(validity_days));

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| A2aError::IdentityCorrupt(format!("certificate signing: {e}")))?;
    Ok(cert.pem())
}

/// Write via a temp file and rename so concurrent readers never observe a
/// partial file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
