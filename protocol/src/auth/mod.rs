//! # Authentication
//!
//! ```text
//! challenge.rs     - single-use, short-lived nonces keyed by DID
//! strategy.rs      - credential-proof / account-signature verification
//! session.rs       - stateless HS256 session tokens
//! authenticator.rs - the challenge → verify → session flow
//! ```

pub mod authenticator;
pub mod challenge;
pub mod session;
pub mod strategy;

pub use authenticator::{AuthError, Authenticator};
pub use challenge::{Challenge, ChallengeStore};
pub use session::{Session, SessionCodec, SessionError, SessionGrant};
pub use strategy::{
    sign_account_challenge, sign_credential_proof, AccountSignatureStrategy,
    CredentialProofStrategy, StrategyKind, VerificationStrategy,
};
