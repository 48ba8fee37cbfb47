use thiserror::Error;

use janitor_pipeline::BoxError;

/// Errors an operation can raise from its entry point.
///
/// Operations may return any error type; these cover the cases shared by
/// every operation.
#[derive(Debug, Error)]
pub enum OperationError {
  /// The run was cancelled while the operation was working.
  #[error("operation cancelled")]
  Cancelled,

  /// A record could not be processed.
  #[error("record {record}: {message}")]
  Record {
    record: String,
    message: String,
    #[source]
    source: Option<BoxError>,
  },

  /// An external collaborator (store, transformer, service) failed.
  #[error("{service} failed")]
  Service {
    service: String,
    #[source]
    source: BoxError,
  },

  /// Releasing a transient run resource failed.
  #[error("failed to release resource '{name}'")]
  Release {
    name: String,
    #[source]
    source: BoxError,
  },
}

impl OperationError {
  pub fn record(record: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Record {
      record: record.into(),
      message: message.into(),
      source: None,
    }
  }

  pub fn service(service: impl Into<String>, source: impl Into<BoxError>) -> Self {
    Self::Service {
      service: service.into(),
      source: source.into(),
    }
  }
}
