use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn invalid_resource(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidResource {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn out_of_range(offset: u64, length: u64, capacity: u64) -> Error {
        Error(
            ErrorKind::OutOfRange {
                offset,
                length,
                capacity,
            }
            .into(),
        )
    }

    pub fn resource_exhausted(requested: u64, source: std::io::Error) -> Error {
        Error(ErrorKind::ResourceExhausted { requested, source }.into())
    }

    pub fn malformed_encoding(offset: u64, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::MalformedEncoding {
                offset,
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn unpaired_surrogate(index: usize, code_unit: u16) -> Error {
        Error(ErrorKind::UnpairedSurrogate { index, code_unit }.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    /// Returns `true` if this error reports access to a released resource.
    pub fn is_invalid_resource(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidResource { .. })
    }

    /// Returns `true` if this error reports an offset/length outside of the addressable range.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfRange { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("resource is no longer valid: {context}")]
    InvalidResource { context: String },

    #[error("range [{offset}, {offset} + {length}) is outside of capacity {capacity}")]
    OutOfRange {
        offset: u64,
        length: u64,
        capacity: u64,
    },

    #[error("failed to allocate {requested} bytes of native memory: {source}")]
    ResourceExhausted {
        requested: u64,
        source: std::io::Error,
    },

    #[error("malformed UTF-8 at offset {offset}: {message}")]
    MalformedEncoding { offset: u64, message: String },

    #[error("unpaired surrogate {code_unit:#06x} at index {index}")]
    UnpairedSurrogate { index: usize, code_unit: u16 },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_roundtrip() {
        let e = Error::out_of_range(10, 5, 12);
        assert!(e.is_out_of_range());
        assert!(!e.is_invalid_resource());
        match e.into_kind() {
            ErrorKind::OutOfRange {
                offset,
                length,
                capacity,
            } => {
                assert_eq!((offset, length, capacity), (10, 5, 12));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_display() {
        let e = Error::unpaired_surrogate(3, 0xd800);
        assert_eq!(e.to_string(), "unpaired surrogate 0xd800 at index 3");

        let e = Error::invalid_resource("get_array");
        assert!(e.is_invalid_resource());
        assert_eq!(e.to_string(), "resource is no longer valid: get_array");
    }

    #[test]
    fn test_from_io_error() {
        let e: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        match e.kind() {
            ErrorKind::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
