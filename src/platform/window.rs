// winit platform
//
// Surface creation goes through the per-platform khr loaders, matching the
// raw display/window handle pair reported by the window.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use winit::window::Window;

use super::Platform;

/// Instance extensions needed to present to windows on `display`.
pub fn surface_extensions_for(display: &RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform_extension = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };
    Ok(vec![khr::Surface::name(), platform_extension])
}

pub struct WinitPlatform {
    window: Arc<Window>,
    close_requested: AtomicBool,
}

impl WinitPlatform {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            close_requested: AtomicBool::new(false),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Called by the event loop on `WindowEvent::CloseRequested`.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Relaxed);
    }

    fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        Ok(self
            .window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw())
    }
}

impl Platform for WinitPlatform {
    fn required_instance_extensions(&self) -> Result<Vec<&'static CStr>> {
        surface_extensions_for(&self.raw_display_handle()?)
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let display_handle = self.raw_display_handle()?;
        let window_handle = self
            .window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let surface = match (display_handle, window_handle) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
                let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let dpy = display
                    .display
                    .context("Xlib display handle has no display connection")?;
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy.as_ptr() as *mut _)
                    .window(handle.window);
                khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                let connection = display
                    .connection
                    .context("XCB display handle has no connection")?;
                let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection.as_ptr())
                    .window(handle.window.get());
                khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr())
                    .surface(handle.surface.as_ptr());
                khr::WaylandSurface::new(entry, instance)
                    .create_wayland_surface(&create_info, None)
            }
            (display, window) => anyhow::bail!(
                "Unsupported window handle pair: {:?} / {:?}",
                display,
                window
            ),
        };

        surface.context("Failed to create window surface")
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Relaxed)
    }
}
