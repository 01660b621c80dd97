//! Wire contracts shared by the services

mod challenge;
mod collaborators;
mod error;
mod managing;

pub use challenge::{
    ArithmeticPayload, ArithmeticResponse, Challenge, ChallengeError, ChallengePayload,
    ChallengeResponse,
};
pub use collaborators::{PayloadRequest, ScoringRequest, ScoringResponse};
pub use error::{ErrorDetails, ErrorResponse};
pub use managing::{
    ConsumeRequest, HealthResponse, MinerSamplingResponse, ScoreEntry, ScoreHistoryResponse,
    ScoresResponse, UpdateScoreRequest, UpdateScoreResponse,
};
