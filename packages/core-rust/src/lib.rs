//! opsguard core: correlation context, typed errors, and recovery strategies.

pub mod context;
pub mod correlation;
pub mod error;
pub mod recovery;

pub use context::{ContextManager, ContextScoped, ContextSnapshot, RequestData, SanitizedContext, UserContext};
pub use correlation::{correlation_context, CorrelationGuard, CorrelationManager};
pub use error::{AppError, ErrorKind};
pub use recovery::{
    AuthenticationRecoveryStrategy, DatabaseRecoveryStrategy, RecoveryEngine, RecoveryResult,
    RecoveryStrategy, ValidationRecoveryStrategy,
};
