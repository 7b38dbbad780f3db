use thiserror::Error;

/// Outcome of one `capture_frame` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureResult {
    /// A frame was delivered.
    Success,
    /// No frame this time. Retrying later may succeed.
    ErrorTemporary,
    /// Capture cannot continue without caller action.
    ErrorPermanent,
}

impl CaptureResult {
    pub fn is_success(self) -> bool {
        matches!(self, CaptureResult::Success)
    }

    pub fn from_error(err: &CaptureError) -> Self {
        if err.is_permanent() {
            CaptureResult::ErrorPermanent
        } else {
            CaptureResult::ErrorTemporary
        }
    }
}

/// Reasons a capture attempt or backend operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("screen recording permission has not been granted")]
    NoPermission,
    #[error("capture backend unavailable: {0}")]
    BackendUnavailable(&'static str),
    #[error("capture source is gone or was never valid")]
    SourceUnavailable,
    #[error("capture OS error ({context}): 0x{code:08X}")]
    Os { context: &'static str, code: u32 },
    #[error("capture failed: {0}")]
    Runtime(&'static str),
}

impl CaptureError {
    /// Permission, source and backend problems need caller intervention.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CaptureError::NoPermission
                | CaptureError::BackendUnavailable(_)
                | CaptureError::SourceUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_mapping() {
        assert_eq!(
            CaptureResult::from_error(&CaptureError::NoPermission),
            CaptureResult::ErrorPermanent
        );
        assert_eq!(
            CaptureResult::from_error(&CaptureError::SourceUnavailable),
            CaptureResult::ErrorPermanent
        );
        assert_eq!(
            CaptureResult::from_error(&CaptureError::Runtime("no frame yet")),
            CaptureResult::ErrorTemporary
        );
        assert_eq!(
            CaptureResult::from_error(&CaptureError::Os { context: "Map", code: 1 }),
            CaptureResult::ErrorTemporary
        );
    }

    #[test]
    fn test_os_error_display() {
        let err = CaptureError::Os {
            context: "AcquireNextFrame",
            code: 0x887A0026,
        };
        assert_eq!(
            err.to_string(),
            "capture OS error (AcquireNextFrame): 0x887A0026"
        );
    }
}
