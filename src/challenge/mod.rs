// Challenge flow — typed requests in, scored sessions out.

pub mod request;
pub mod session;

pub use request::{DecryptedChallengeRequest, Publication, PublicationKind};
pub use session::{
    complete_challenge, evaluate_publication, purge_expired_sessions, record_oauth_identity,
    Evaluation, EvaluationOptions,
};
