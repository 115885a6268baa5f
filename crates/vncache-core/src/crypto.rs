//! Cryptographic primitives for VNCache.
//!
//! Provides three things:
//!   1. BLAKE3 hashing — used wherever a stable content digest is needed.
//!   2. JWT sign/verify — `jsonwebtoken` over RSA-PKCS1-SHA256 or
//!      ECDSA-P256-SHA256 key material, selected per node.
//!   3. Detached signatures — a raw signature over a SHA-256 hash, used to
//!      prove possession of the private key during the upgrade handshake
//!      independent of any JWT.
//!
//! Key material is loaded once at startup and never rotated in-process.
//! Private key bytes are wrapped in `Zeroizing` so they are wiped on drop.

use jsonwebtoken::{Algorithm as JwtAlgorithm, DecodingKey, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, RsaKeyPair};
use thiserror::Error;
use zeroize::Zeroizing;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// SHA-256 hash, used specifically for the detached upgrade signature: a
/// raw signature over the SHA-256 hash of the negotiation JWT string.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use ring::digest;
    let digest = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

// ── Key algorithm ─────────────────────────────────────────────────────────────

/// The two asymmetric algorithms this system accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    RsaPkcs1Sha256,
    EcdsaP256Sha256,
}

impl KeyAlgorithm {
    fn jwt_algorithm(self) -> JwtAlgorithm {
        match self {
            KeyAlgorithm::RsaPkcs1Sha256 => JwtAlgorithm::RS256,
            KeyAlgorithm::EcdsaP256Sha256 => JwtAlgorithm::ES256,
        }
    }

    fn kid(self) -> &'static str {
        match self {
            KeyAlgorithm::RsaPkcs1Sha256 => "rsa-pkcs1-sha256",
            KeyAlgorithm::EcdsaP256Sha256 => "ecdsa-p256-sha256",
        }
    }

    /// Parses the `key_algorithm` config value.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        match s {
            "rsa-pkcs1-sha256" => Ok(KeyAlgorithm::RsaPkcs1Sha256),
            "ecdsa-p256-sha256" => Ok(KeyAlgorithm::EcdsaP256Sha256),
            _ => Err(CryptoError::InvalidKeyMaterial),
        }
    }
}

/// Strips PEM armor and base64-decodes the body, returning raw DER bytes.
/// Both `ring`'s PKCS#8 loaders and our own key-type sniffing need this;
/// `jsonwebtoken`'s `from_rsa_pem`/`from_ec_pem` take the PEM text directly
/// and do their own parsing, so this helper is only used on the `ring` side.
fn pem_to_der(pem: &str) -> Result<Vec<u8>, CryptoError> {
    use base64::Engine;
    let body: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|_| CryptoError::BadPem)
}

enum DetachedSigner {
    Rsa(Box<RsaKeyPair>, SystemRandom),
    Ecdsa(Box<EcdsaKeyPair>, SystemRandom),
}

enum DetachedVerifier {
    Rsa(Vec<u8>),
    Ecdsa(Vec<u8>),
}

/// This node's own signing identity: a private key usable both to issue
/// JWTs and to produce detached signatures.
pub struct SigningKey {
    alg: KeyAlgorithm,
    encoding_key: EncodingKey,
    signer: DetachedSigner,
}

impl SigningKey {
    /// Load a PKCS#8 PEM private key. The same PEM text is handed to
    /// `jsonwebtoken` for JWT signing and, stripped to DER, to `ring` for
    /// detached signatures.
    pub fn from_pkcs8_pem(pem: &str, alg: KeyAlgorithm) -> Result<Self, CryptoError> {
        let der = Zeroizing::new(pem_to_der(pem)?);
        let (encoding_key, signer) = match alg {
            KeyAlgorithm::RsaPkcs1Sha256 => {
                let pair =
                    RsaKeyPair::from_pkcs8(&der).map_err(|_| CryptoError::InvalidKeyMaterial)?;
                (
                    EncodingKey::from_rsa_pem(pem.as_bytes())
                        .map_err(|_| CryptoError::InvalidKeyMaterial)?,
                    DetachedSigner::Rsa(Box::new(pair), SystemRandom::new()),
                )
            }
            KeyAlgorithm::EcdsaP256Sha256 => {
                let pair = EcdsaKeyPair::from_pkcs8(
                    &ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING,
                    &der,
                    &SystemRandom::new(),
                )
                .map_err(|_| CryptoError::InvalidKeyMaterial)?;
                (
                    EncodingKey::from_ec_pem(pem.as_bytes())
                        .map_err(|_| CryptoError::InvalidKeyMaterial)?,
                    DetachedSigner::Ecdsa(Box::new(pair), SystemRandom::new()),
                )
            }
        };
        Ok(Self {
            alg,
            encoding_key,
            signer,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.alg
    }

    /// Sign a JWT claim set with this node's private key.
    pub fn sign_jwt<T: serde::Serialize>(&self, claims: &T) -> Result<String, CryptoError> {
        let mut header = jsonwebtoken::Header::new(self.alg.jwt_algorithm());
        header.kid = Some(self.alg.kid().to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|_| CryptoError::SigningFailed)
    }

    /// Sign a 32-byte hash directly, producing a detached signature.
    ///
    /// RSA uses PKCS#1 v1.5 padding. ECDSA uses the IEEE-P1363 fixed-width
    /// r||s encoding (`ECDSA_P256_SHA256_FIXED_SIGNING` already emits this;
    /// no extra re-encoding step is needed).
    pub fn sign_message_hash(&self, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        match &self.signer {
            DetachedSigner::Rsa(pair, rng) => {
                let mut sig = vec![0u8; pair.public_modulus_len()];
                pair.sign(&ring::signature::RSA_PKCS1_SHA256, rng, digest, &mut sig)
                    .map_err(|_| CryptoError::SigningFailed)?;
                Ok(sig)
            }
            DetachedSigner::Ecdsa(pair, rng) => pair
                .sign(rng, digest)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| CryptoError::SigningFailed),
        }
    }
}

/// A public key this node trusts — either the client key or the peer key,
/// selected by `is_peer` in `AuthenticationManager`.
pub struct VerifyingKey {
    alg: KeyAlgorithm,
    decoding_key: DecodingKey,
    verifier: DetachedVerifier,
}

impl VerifyingKey {
    /// Load a public key PEM (SPKI for RSA, SEC1/SPKI for EC — whatever
    /// `jsonwebtoken` accepts for the chosen algorithm).
    pub fn from_public_pem(pem: &str, alg: KeyAlgorithm) -> Result<Self, CryptoError> {
        let (decoding_key, verifier) = match alg {
            KeyAlgorithm::RsaPkcs1Sha256 => (
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|_| CryptoError::InvalidKeyMaterial)?,
                DetachedVerifier::Rsa(pem_to_der(pem)?),
            ),
            KeyAlgorithm::EcdsaP256Sha256 => (
                DecodingKey::from_ec_pem(pem.as_bytes())
                    .map_err(|_| CryptoError::InvalidKeyMaterial)?,
                DetachedVerifier::Ecdsa(pem_to_der(pem)?),
            ),
        };
        Ok(Self {
            alg,
            decoding_key,
            verifier,
        })
    }

    /// Build a detached-signature-only verifier from a `SigningKey`'s own
    /// public half — used in tests that round-trip a single key pair.
    ///
    /// `jsonwebtoken` has no API to derive a `DecodingKey` from our
    /// `EncodingKey`, so the `decoding_key` here is a placeholder and must
    /// not be used with `verify_jwt`; callers that need JWT verification
    /// load a `VerifyingKey` from a separate public-key PEM via
    /// `from_public_pem`, as the running daemon does.
    pub fn from_signing_key(key: &SigningKey) -> Self {
        let verifier = match &key.signer {
            DetachedSigner::Rsa(pair, _) => DetachedVerifier::Rsa(pair.public_key().as_ref().to_vec()),
            DetachedSigner::Ecdsa(pair, _) => {
                DetachedVerifier::Ecdsa(pair.public_key().as_ref().to_vec())
            }
        };
        Self {
            alg: key.alg,
            decoding_key: DecodingKey::from_secret(b"detached-signature-verifier-only"),
            verifier,
        }
    }

    /// Verify a JWT's signature and return its claims.
    pub fn verify_jwt<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<T, CryptoError> {
        let mut validation = jsonwebtoken::Validation::new(self.alg.jwt_algorithm());
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Verify a detached signature over a 32-byte hash.
    pub fn verify_message_hash(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        use ring::signature::UnparsedPublicKey;
        match &self.verifier {
            DetachedVerifier::Rsa(key) => {
                UnparsedPublicKey::new(&ring::signature::RSA_PKCS1_2048_8192_SHA256, key)
                    .verify(digest, signature)
                    .is_ok()
            }
            DetachedVerifier::Ecdsa(key) => {
                UnparsedPublicKey::new(&ring::signature::ECDSA_P256_SHA256_FIXED, key)
                    .verify(digest, signature)
                    .is_ok()
            }
        }
    }
}

// ── Authentication Manager ────────────────────────────────────────────────────

/// Component 10: sign/verify JWTs and detached signatures, selecting
/// between the client key and the peer key per-call via `is_peer`.
pub struct AuthenticationManager {
    own: SigningKey,
    client_key: VerifyingKey,
    peer_key: VerifyingKey,
}

impl AuthenticationManager {
    pub fn new(own: SigningKey, client_key: VerifyingKey, peer_key: VerifyingKey) -> Self {
        Self {
            own,
            client_key,
            peer_key,
        }
    }

    /// The `alg`/`kid` header this node's JWTs carry.
    pub fn jwt_header(&self) -> jsonwebtoken::Header {
        let mut header = jsonwebtoken::Header::new(self.own.alg.jwt_algorithm());
        header.kid = Some(self.own.alg.kid().to_string());
        header
    }

    pub fn sign_jwt<T: serde::Serialize>(&self, claims: &T) -> Result<String, CryptoError> {
        self.own.sign_jwt(claims)
    }

    pub fn verify_jwt<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        is_peer: bool,
    ) -> Result<T, CryptoError> {
        let key = if is_peer {
            &self.peer_key
        } else {
            &self.client_key
        };
        key.verify_jwt(token)
    }

    pub fn sign_message_hash(&self, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        self.own.sign_message_hash(digest)
    }

    pub fn verify_message_hash(&self, digest: &[u8; 32], signature: &[u8], is_peer: bool) -> bool {
        let key = if is_peer {
            &self.peer_key
        } else {
            &self.client_key
        };
        key.verify_message_hash(digest, signature)
    }
}

/// Random base32 challenge string with at least 16 bytes of entropy,
/// used as the JWT `chl` claim.
pub fn generate_challenge() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes)
}

/// Random nonce used on peer advertisements and discovery requests.
pub fn generate_nonce() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed PEM key material")]
    BadPem,
    #[error("invalid or unsupported key material")]
    InvalidKeyMaterial,
    #[error("signing operation failed")]
    SigningFailed,
    #[error("signature or JWT verification failed")]
    InvalidSignature,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
