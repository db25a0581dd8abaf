//! # SCRAM Client Module
//!
//! SASL SCRAM-SHA-256/512 client conversation (RFC 5802/7677). The
//! conversation is a one-shot state machine: `step` consumes each server
//! challenge and emits the next client message; `done` reports completion
//! after the server signature has been verified.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{KafkaError, Result};

const NONCE_LEN: usize = 24;

/// Hash family used by the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramMechanism {
    Sha256,
    Sha512,
}

impl ScramMechanism {
    /// The SASL mechanism name
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
            ScramMechanism::Sha512 => "SCRAM-SHA-512",
        }
    }

    /// Parse a SASL mechanism name
    pub fn from_mechanism_name(name: &str) -> Result<Self> {
        match name {
            "SCRAM-SHA-256" => Ok(ScramMechanism::Sha256),
            "SCRAM-SHA-512" => Ok(ScramMechanism::Sha512),
            other => Err(KafkaError::scram(format!(
                "unsupported SCRAM mechanism: {other}"
            ))),
        }
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
            ScramMechanism::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            ScramMechanism::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|e| KafkaError::scram(format!("invalid hmac key: {e}")))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            ScramMechanism::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key)
                    .map_err(|e| KafkaError::scram(format!("invalid hmac key: {e}")))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    fn salted_password(&self, password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            ScramMechanism::Sha256 => {
                let mut out = vec![0u8; 32];
                pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
                out
            }
            ScramMechanism::Sha512 => {
                let mut out = vec![0u8; 64];
                pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, iterations, &mut out);
                out
            }
        }
    }
}

/// SCRAM client credentials plus the hash family
#[derive(Debug, Clone)]
pub struct ScramClient {
    mechanism: ScramMechanism,
    username: String,
    password: String,
    authz_id: Option<String>,
}

impl ScramClient {
    pub fn new(
        mechanism: ScramMechanism,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            mechanism,
            username: username.into(),
            password: password.into(),
            authz_id: None,
        }
    }

    /// Set an authorization identity distinct from the authentication user
    pub fn with_authz_id(mut self, authz_id: impl Into<String>) -> Self {
        self.authz_id = Some(authz_id.into());
        self
    }

    /// Begin a conversation with a random client nonce
    pub fn begin(&self) -> ScramConversation {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        self.begin_with_nonce(nonce)
    }

    /// Begin a conversation with a caller-supplied nonce
    ///
    /// Intended for tests that replay known exchanges.
    pub fn begin_with_nonce(&self, nonce: impl Into<String>) -> ScramConversation {
        ScramConversation {
            client: self.clone(),
            client_nonce: nonce.into(),
            state: ConversationState::Initial,
        }
    }
}

enum ConversationState {
    Initial,
    AwaitServerFirst { client_first_bare: String, gs2_header: String },
    AwaitServerFinal { server_signature_b64: String },
    Done,
    Failed,
}

/// One in-flight SCRAM exchange
pub struct ScramConversation {
    client: ScramClient,
    client_nonce: String,
    state: ConversationState,
}

impl ScramConversation {
    /// Feed the next server challenge in and produce the next client message
    ///
    /// The first call takes an empty challenge and emits the client-first
    /// message; the final call verifies the server signature and emits an
    /// empty string.
    pub fn step(&mut self, challenge: &str) -> Result<String> {
        match std::mem::replace(&mut self.state, ConversationState::Failed) {
            ConversationState::Initial => {
                if !challenge.is_empty() {
                    return Err(KafkaError::scram(
                        "unexpected challenge before client-first message",
                    ));
                }

                let gs2_header = match &self.client.authz_id {
                    Some(authz) => format!("n,a={},", saslname_escape(authz)),
                    None => "n,,".to_string(),
                };
                let client_first_bare = format!(
                    "n={},r={}",
                    saslname_escape(&self.client.username),
                    self.client_nonce
                );
                let message = format!("{gs2_header}{client_first_bare}");

                self.state = ConversationState::AwaitServerFirst {
                    client_first_bare,
                    gs2_header,
                };
                Ok(message)
            }

            ConversationState::AwaitServerFirst {
                client_first_bare,
                gs2_header,
            } => {
                let fields = parse_challenge(challenge)?;
                let server_nonce = fields
                    .iter()
                    .find(|(k, _)| *k == "r")
                    .map(|(_, v)| v.to_string())
                    .ok_or_else(|| KafkaError::scram("server-first missing nonce"))?;
                let salt_b64 = fields
                    .iter()
                    .find(|(k, _)| *k == "s")
                    .map(|(_, v)| v.to_string())
                    .ok_or_else(|| KafkaError::scram("server-first missing salt"))?;
                let iterations: u32 = fields
                    .iter()
                    .find(|(k, _)| *k == "i")
                    .map(|(_, v)| v.to_string())
                    .ok_or_else(|| KafkaError::scram("server-first missing iteration count"))?
                    .parse()
                    .map_err(|_| KafkaError::scram("invalid iteration count"))?;

                if !server_nonce.starts_with(&self.client_nonce) {
                    return Err(KafkaError::scram(
                        "server nonce does not extend the client nonce",
                    ));
                }
                if iterations == 0 {
                    return Err(KafkaError::scram("iteration count must be positive"));
                }

                let salt = BASE64
                    .decode(salt_b64.as_bytes())
                    .map_err(|e| KafkaError::scram(format!("invalid salt encoding: {e}")))?;

                let mech = self.client.mechanism;
                let salted = mech.salted_password(&self.client.password, &salt, iterations);
                let client_key = mech.hmac(&salted, b"Client Key")?;
                let stored_key = mech.hash(&client_key);

                let channel_binding = BASE64.encode(gs2_header.as_bytes());
                let client_final_bare = format!("c={channel_binding},r={server_nonce}");
                let auth_message =
                    format!("{client_first_bare},{challenge},{client_final_bare}");

                let client_signature = mech.hmac(&stored_key, auth_message.as_bytes())?;
                let proof: Vec<u8> = client_key
                    .iter()
                    .zip(client_signature.iter())
                    .map(|(k, s)| k ^ s)
                    .collect();

                let server_key = mech.hmac(&salted, b"Server Key")?;
                let server_signature = mech.hmac(&server_key, auth_message.as_bytes())?;

                let message = format!("{client_final_bare},p={}", BASE64.encode(&proof));
                self.state = ConversationState::AwaitServerFinal {
                    server_signature_b64: BASE64.encode(&server_signature),
                };
                Ok(message)
            }

            ConversationState::AwaitServerFinal {
                server_signature_b64,
            } => {
                if let Some(err) = challenge.strip_prefix("e=") {
                    return Err(KafkaError::scram(format!("server rejected: {err}")));
                }
                let verifier = challenge
                    .strip_prefix("v=")
                    .ok_or_else(|| KafkaError::scram("server-final missing verifier"))?;

                if verifier != server_signature_b64 {
                    return Err(KafkaError::scram("server signature mismatch"));
                }

                self.state = ConversationState::Done;
                Ok(String::new())
            }

            ConversationState::Done => Err(KafkaError::scram("conversation already complete")),
            ConversationState::Failed => Err(KafkaError::scram("conversation already failed")),
        }
    }

    /// Whether the exchange completed and the server was verified
    pub fn done(&self) -> bool {
        matches!(self.state, ConversationState::Done)
    }
}

/// Escape `,` and `=` in a SASL name per RFC 5802
fn saslname_escape(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

/// Split an `a=1,b=2` challenge into (key, value) pairs
fn parse_challenge(challenge: &str) -> Result<Vec<(&str, &str)>> {
    if challenge.is_empty() {
        return Err(KafkaError::scram("empty server challenge"));
    }
    challenge
        .split(',')
        .map(|field| {
            field
                .split_once('=')
                .ok_or_else(|| KafkaError::scram(format!("malformed challenge field: {field}")))
        })
        .collect()
}
