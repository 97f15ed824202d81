// Debug/validation messenger
//
// Routes VK_EXT_debug_utils callbacks into the `log` facade. The create and
// destroy entry points are resolved once through vkGetInstanceProcAddr and
// kept as optional function pointers: a missing create function is fatal, a
// missing destroy function turns teardown into a no-op.

use anyhow::Result;
use ash::vk;
use std::ffi::{c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::RendererError;

const CREATE_FN_NAME: &CStr = c"vkCreateDebugUtilsMessengerEXT";
const DESTROY_FN_NAME: &CStr = c"vkDestroyDebugUtilsMessengerEXT";

/// Log target used for every validation message.
pub const LOG_TARGET: &str = "vulkan";

/// Lowest severity forwarded by the messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Error,
    Warning,
    Info,
    Verbose,
}

impl DebugLevel {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" => Some(Self::Info),
            "verbose" | "trace" => Some(Self::Verbose),
            _ => None,
        }
    }

    /// Severity mask covering this level and everything more severe.
    pub fn severity_flags(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        let mut flags = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        if self >= Self::Warning {
            flags |= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
        }
        if self >= Self::Info {
            flags |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
        }
        if self >= Self::Verbose {
            flags |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
        }
        flags
    }
}

/// One-to-one mapping from Vulkan message severity to log level.
pub fn log_level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        _ => log::Level::Debug,
    }
}

fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    }
}

/// Messenger create info, also chained into instance creation so that
/// vkCreateInstance/vkDestroyInstance themselves are covered.
pub fn create_info(level: DebugLevel) -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(level.severity_flags())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

pub struct DebugMessenger {
    instance: vk::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    destroy_fn: Option<vk::PFN_vkDestroyDebugUtilsMessengerEXT>,
}

impl DebugMessenger {
    /// Register the messenger on `instance`.
    ///
    /// # Safety
    /// `instance` must be a live instance created from `entry` with the
    /// debug-utils extension enabled, and must outlive the messenger.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        level: DebugLevel,
    ) -> Result<Self> {
        let handle = instance.handle();

        let create_fn = entry
            .get_instance_proc_addr(handle, CREATE_FN_NAME.as_ptr())
            .map(|f| {
                std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkCreateDebugUtilsMessengerEXT>(f)
            })
            .ok_or(RendererError::MissingEntryPoint("vkCreateDebugUtilsMessengerEXT"))?;

        let destroy_fn = entry
            .get_instance_proc_addr(handle, DESTROY_FN_NAME.as_ptr())
            .map(|f| {
                std::mem::transmute::<unsafe extern "system" fn(), vk::PFN_vkDestroyDebugUtilsMessengerEXT>(f)
            });
        if destroy_fn.is_none() {
            log::warn!("vkDestroyDebugUtilsMessengerEXT unavailable; messenger will leak on shutdown");
        }

        let info = create_info(level);
        let mut messenger = vk::DebugUtilsMessengerEXT::null();
        create_fn(handle, &info, std::ptr::null(), &mut messenger)
            .result()
            .map_err(|e| anyhow::anyhow!("Failed to create debug messenger: {e}"))?;

        log::debug!("Debug messenger registered at level {:?}", level);

        Ok(Self {
            instance: handle,
            messenger,
            destroy_fn,
        })
    }

    /// Unregister the messenger. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.messenger == vk::DebugUtilsMessengerEXT::null() {
            return;
        }
        if let Some(destroy) = self.destroy_fn {
            unsafe { destroy(self.instance, self.messenger, std::ptr::null()) };
        }
        self.messenger = vk::DebugUtilsMessengerEXT::null();
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        self.destroy();
    }
}

// Must not unwind into the driver.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            std::borrow::Cow::Borrowed("<no message>")
        } else {
            CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
        };

        log::log!(
            target: LOG_TARGET,
            log_level_for(message_severity),
            "[{}] {}",
            message_type_name(message_type),
            message
        );
    }));

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sev = vk::DebugUtilsMessageSeverityFlagsEXT;

    #[test]
    fn severities_map_one_to_one() {
        assert_eq!(log_level_for(Sev::ERROR), log::Level::Error);
        assert_eq!(log_level_for(Sev::WARNING), log::Level::Warn);
        assert_eq!(log_level_for(Sev::INFO), log::Level::Info);
        assert_eq!(log_level_for(Sev::VERBOSE), log::Level::Trace);
    }

    #[test]
    fn level_masks_are_cumulative() {
        assert_eq!(DebugLevel::Error.severity_flags(), Sev::ERROR);
        assert_eq!(DebugLevel::Warning.severity_flags(), Sev::ERROR | Sev::WARNING);
        assert_eq!(
            DebugLevel::Verbose.severity_flags(),
            Sev::ERROR | Sev::WARNING | Sev::INFO | Sev::VERBOSE
        );
    }

    #[test]
    fn level_names_parse() {
        assert_eq!(DebugLevel::parse("Warning"), Some(DebugLevel::Warning));
        assert_eq!(DebugLevel::parse("trace"), Some(DebugLevel::Verbose));
        assert_eq!(DebugLevel::parse("loud"), None);
    }

    #[test]
    fn callback_tolerates_missing_message() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default();
        let result = unsafe {
            debug_callback(
                Sev::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::FALSE);

        let result = unsafe {
            debug_callback(
                Sev::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::FALSE);
    }

    #[test]
    fn destroy_without_entry_point_is_a_no_op() {
        use ash::vk::Handle;

        let mut messenger = DebugMessenger {
            instance: vk::Instance::null(),
            messenger: vk::DebugUtilsMessengerEXT::from_raw(1),
            destroy_fn: None,
        };
        messenger.destroy();
        assert_eq!(messenger.messenger, vk::DebugUtilsMessengerEXT::null());
        messenger.destroy();
    }
}
