//! Image layout tracking and submit-time validation for Vulkan command buffers.
//!
//! Every subresource of a Vulkan image (one aspect, one mip level, one array layer) is in some
//! *layout* at any time, and every command that uses an image requires its subresources to be
//! in a particular layout. This crate tracks which layouts command buffers expect and produce,
//! and checks them against the layouts the images are actually in when the command buffers are
//! submitted.
//!
//! # Overview
//!
//! - An [`Image`](crate::image::Image) owns the *global* layout map: the layout each of its
//!   subresources is in once every committed command buffer has executed.
//!
//! - A [`CommandBufferState`](crate::command_buffer::CommandBufferState) records, per image it
//!   touches, an [`ImageLayoutRegistry`](crate::image::ImageLayoutRegistry): the layout each
//!   subresource is expected to be in on first use, and the layout it is left in.
//!
//! - At submission, [`validate_cmd_buf_image_layouts`] compares the expectations of a command
//!   buffer against the layouts that earlier command buffers of the same submission leave
//!   behind, falling back to the global layout map. Once the submission is accepted,
//!   [`update_cmd_buf_image_layouts`] commits the final layouts to the global maps.
//!
//! Subresources are flattened to a dense linear index space, and layouts are stored in
//! [`RangeMap`](crate::range_map::RangeMap)s over that space, so that the cost of tracking
//! scales with the number of distinct layout transitions rather than with the size of the
//! images.
//!
//! [`validate_cmd_buf_image_layouts`]: crate::command_buffer::validate_cmd_buf_image_layouts
//! [`update_cmd_buf_image_layouts`]: crate::command_buffer::update_cmd_buf_image_layouts

pub use ash::vk::DeviceSize;
use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

mod macros;
pub mod command_buffer;
pub mod image;
pub mod memory;
pub mod range_map;

/// Gives access to the Vulkan handle of an object.
pub trait VulkanObject {
    /// The type of the handle.
    type Handle: ash::vk::Handle;

    /// Returns the raw Vulkan handle of the object.
    fn handle(&self) -> Self::Handle;
}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

/// The arguments or other context of a call did not satisfy a requirement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationError {
    /// The context in which the problem exists, usually the name of the invalid argument.
    pub context: Cow<'static, str>,

    /// A description of the problem.
    pub problem: Cow<'static, str>,

    /// The Vulkan valid usage IDs of the requirement that was violated.
    pub vuids: &'static [&'static str],
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if self.context.is_empty() {
            write!(f, "{}", self.problem)?;
        } else {
            write!(f, "{}: {}", self.context, self.problem)?;
        }

        if !self.vuids.is_empty() {
            write!(f, "\n    Vulkan VUIDs: {}", self.vuids.join(", "))?;
        }

        Ok(())
    }
}

impl Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let error = ValidationError {
            context: "mip_levels".into(),
            problem: "is zero".into(),
            vuids: &["VUID-VkImageCreateInfo-mipLevels-00947"],
        };
        assert_eq!(
            error.to_string(),
            "mip_levels: is zero\n    Vulkan VUIDs: VUID-VkImageCreateInfo-mipLevels-00947",
        );

        let error = ValidationError {
            problem: "something went wrong".into(),
            ..Default::default()
        };
        assert_eq!(error.to_string(), "something went wrong");
    }
}
