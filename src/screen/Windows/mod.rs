//! Windows capture backends.
//!
//! - DXGI (Desktop Duplication API): monitor capture, window capture by cropping
//! - WGC (Windows Graphics Capture): event driven window or monitor capture
//! - GDI (`PrintWindow`): software fallback that works for occluded windows

#[path = "DXGI/mod.rs"]
pub mod dxgi;
#[path = "GDI/mod.rs"]
pub mod gdi;
pub mod graphics_capture;
pub mod window_utils;

use std::ffi::c_void;
use std::slice;

use windows::Win32::Foundation::{GetLastError, HMODULE, HWND};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL_10_0,
    D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::Win32::Graphics::Gdi::HMONITOR;

use crate::capturer::SourceId;
use crate::error::CaptureError;
use crate::frame::{convert_bgra_to_rgba, BasicFrame};
use crate::geometry::Size;

pub use dxgi::DxgiDuplicator;
pub use gdi::GdiCapturer;
pub use graphics_capture::WgcCapturer;

// ============================================================================
// Handle conversion
// ============================================================================

pub(crate) fn hwnd_of(id: SourceId) -> HWND {
    HWND(id.raw() as usize as *mut c_void)
}

pub(crate) fn hmonitor_of(id: SourceId) -> HMONITOR {
    HMONITOR(id.raw() as usize as *mut c_void)
}

pub(crate) fn id_of_hwnd(hwnd: HWND) -> SourceId {
    SourceId(hwnd.0 as usize as u64)
}

pub(crate) fn id_of_monitor(monitor: HMONITOR) -> SourceId {
    SourceId(monitor.0 as usize as u64)
}

// ============================================================================
// Error helpers
// ============================================================================

pub(crate) fn os_error(context: &'static str, err: windows::core::Error) -> CaptureError {
    CaptureError::Os {
        context,
        code: err.code().0 as u32,
    }
}

pub(crate) fn last_os_error(context: &'static str) -> CaptureError {
    CaptureError::Os {
        context,
        code: unsafe { GetLastError().0 },
    }
}

pub(crate) fn wide_to_string(buffer: &[u16]) -> String {
    let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..end])
}

// ============================================================================
// Direct3D helpers
// ============================================================================

/// Creates a BGRA capable D3D11 device, hardware first, WARP as fallback.
pub(crate) fn create_d3d11_device() -> Result<(ID3D11Device, ID3D11DeviceContext), CaptureError> {
    let feature_levels = [
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
    ];

    match try_create_device(D3D_DRIVER_TYPE_HARDWARE, &feature_levels) {
        Ok(pair) => Ok(pair),
        Err(err) => {
            log::warn!(err:display = err; "Hardware D3D11 device unavailable, trying WARP");
            try_create_device(D3D_DRIVER_TYPE_WARP, &feature_levels)
        }
    }
}

fn try_create_device(
    driver_type: D3D_DRIVER_TYPE,
    feature_levels: &[windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL],
) -> Result<(ID3D11Device, ID3D11DeviceContext), CaptureError> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    unsafe {
        D3D11CreateDevice(
            None,
            driver_type,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
        .map_err(|err| os_error("D3D11CreateDevice", err))?;
    }
    match (device, context) {
        (Some(device), Some(context)) => Ok((device, context)),
        _ => Err(CaptureError::Runtime("D3D11CreateDevice returned no device")),
    }
}

/// CPU readback of BGRA textures through a reusable staging texture.
#[derive(Default)]
pub(crate) struct StagingReader {
    texture: Option<ID3D11Texture2D>,
    width: u32,
    height: u32,
}

impl StagingReader {
    pub(crate) fn reset(&mut self) {
        self.texture = None;
        self.width = 0;
        self.height = 0;
    }

    fn ensure(&mut self, device: &ID3D11Device, source: &D3D11_TEXTURE2D_DESC) -> Result<ID3D11Texture2D, CaptureError> {
        if let Some(texture) = &self.texture {
            if self.width == source.Width && self.height == source.Height {
                return Ok(texture.clone());
            }
        }

        let desc = D3D11_TEXTURE2D_DESC {
            Width: source.Width,
            Height: source.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: source.Format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };

        let mut staging = None;
        unsafe {
            device
                .CreateTexture2D(&desc, None, Some(&mut staging))
                .map_err(|err| os_error("CreateTexture2D (staging)", err))?;
        }
        let staging = staging.ok_or(CaptureError::Runtime("CreateTexture2D returned no texture"))?;

        self.texture = Some(staging.clone());
        self.width = source.Width;
        self.height = source.Height;
        Ok(staging)
    }

    /// Copies `source` to the CPU and converts it into an RGBA frame.
    pub(crate) fn read(
        &mut self,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        source: &ID3D11Texture2D,
    ) -> Result<BasicFrame, CaptureError> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut desc) };
        if desc.Width == 0 || desc.Height == 0 {
            return Err(CaptureError::Runtime("captured texture is empty"));
        }

        let staging = self.ensure(device, &desc)?;
        unsafe { context.CopyResource(&staging, source) };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|err| os_error("Map (staging)", err))?;
        }

        let pitch = mapped.RowPitch as usize;
        let src = unsafe { slice::from_raw_parts(mapped.pData as *const u8, pitch * desc.Height as usize) };
        let mut frame = BasicFrame::new(Size::new(desc.Width as i32, desc.Height as i32));
        let converted = convert_bgra_to_rgba(src, pitch, &mut frame);

        unsafe { context.Unmap(&staging, 0) };

        if converted {
            Ok(frame)
        } else {
            Err(CaptureError::Runtime("mapped texture smaller than expected"))
        }
    }
}
