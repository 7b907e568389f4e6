//! Domain model (ids, capture parameters, job records, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod params;

pub use self::errors::{ErrorKind, SnapgateError};
pub use self::ids::{JobId, ParseJobIdError};
pub use self::job::{DeliveryState, JobRecord, JobStatus, JobView, TransitionError, WebhookTarget};
pub use self::params::{AdvancedOptions, CaptureParams, ImageFormat, MediaType, ParamsError};
