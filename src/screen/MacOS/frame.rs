use std::sync::Arc;

use core_graphics::display::CGDirectDisplayID;
use screencapturekit::cv::CVPixelBufferLockFlags;
use screencapturekit::prelude::*;

use crate::error::CaptureError;
use crate::frame::BasicFrame;
use crate::geometry::Size;
use crate::mailbox::FrameMailbox;
use crate::options::CaptureOptions;

// ============================================================================
// Stream Output Handler
// ============================================================================

/// Converts every screen sample into an RGBA frame and publishes it.
struct FrameHandler {
    mailbox: Arc<FrameMailbox>,
}

impl SCStreamOutputTrait for FrameHandler {
    fn did_output_sample_buffer(&self, sample: CMSampleBuffer, output_type: SCStreamOutputType) {
        if !matches!(output_type, SCStreamOutputType::Screen) {
            return;
        }

        let Some(pixel_buffer) = sample.image_buffer() else {
            return;
        };
        let Ok(guard) = pixel_buffer.lock(CVPixelBufferLockFlags::READ_ONLY) else {
            return;
        };

        let size = Size::new(guard.width() as i32, guard.height() as i32);
        if let Some(frame) = BasicFrame::from_bgra(size, guard.as_slice(), guard.bytes_per_row()) {
            self.mailbox.publish(frame);
        }
    }
}

// ============================================================================
// Display Stream
// ============================================================================

/// One running ScreenCaptureKit stream for a display.
pub(crate) struct DisplayStream {
    display_id: CGDirectDisplayID,
    stream: SCStream,
    mailbox: Arc<FrameMailbox>,
}

impl DisplayStream {
    pub(crate) fn open(display_id: CGDirectDisplayID, options: &CaptureOptions) -> Result<Self, CaptureError> {
        let content = SCShareableContent::get().map_err(|err| {
            log::warn!(err:debug = err; "SCShareableContent::get failed");
            CaptureError::BackendUnavailable("ScreenCaptureKit shareable content")
        })?;

        let displays = content.displays();
        let display = displays
            .iter()
            .find(|d| d.display_id() == display_id)
            .ok_or(CaptureError::SourceUnavailable)?;

        let filter = SCContentFilter::builder()
            .display(display)
            .exclude_windows(&[])
            .build();

        let fps = options.target_fps.clamp(1, 120) as i32;
        let frame_interval = CMTime::new(1, fps);
        let config = SCStreamConfiguration::new()
            .with_width(display.width())
            .with_height(display.height())
            .with_pixel_format(PixelFormat::BGRA)
            .with_shows_cursor(options.capture_cursor)
            .with_minimum_frame_interval(&frame_interval);

        let mailbox = Arc::new(FrameMailbox::new());
        let mut stream = SCStream::new(&filter, &config);
        stream.add_output_handler(
            FrameHandler {
                mailbox: Arc::clone(&mailbox),
            },
            SCStreamOutputType::Screen,
        );

        stream.start_capture().map_err(|err| {
            log::warn!(err:debug = err; "SCStream start_capture failed");
            CaptureError::BackendUnavailable("ScreenCaptureKit stream")
        })?;

        log::info!(display = display_id, fps = fps; "ScreenCaptureKit stream started");
        Ok(Self {
            display_id,
            stream,
            mailbox,
        })
    }

    pub(crate) fn display_id(&self) -> CGDirectDisplayID {
        self.display_id
    }

    pub(crate) fn latest(&self) -> Option<BasicFrame> {
        self.mailbox.latest()
    }

    /// Stops the stream first so the handler is quiet before the mailbox is cleared.
    pub(crate) fn close(mut self) {
        let _ = self.stream.stop_capture();
        self.mailbox.clear();
    }
}
