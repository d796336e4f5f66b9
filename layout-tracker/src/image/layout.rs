use super::ImageAspects;
use crate::macros::vulkan_enum;

vulkan_enum! {
    /// In-memory layout of the pixel data of an image.
    ///
    /// Each image subresource (aspect, mip level and array layer) can be in a different layout.
    /// Layouts are abstract: the driver decides what each of them means. Every operation that
    /// reads or writes an image requires its subresources to be in specific layouts, and the
    /// application is responsible for transitioning them with barriers before the operation.
    ///
    /// The discriminants are the raw Vulkan values, so comparisons are bit-exact with the API.
    ImageLayout = ImageLayout(i32);

    /// The layout of the data is unknown, and the image is treated as containing no valid data.
    /// A first use that expects `Undefined` places no constraint on the previous layout.
    Undefined = UNDEFINED,

    /// A general-purpose layout that can be used for any operation.
    General = GENERAL,

    /// For a color image used as a color or resolve attachment.
    ColorAttachmentOptimal = COLOR_ATTACHMENT_OPTIMAL,

    /// For a depth/stencil image used as a depth/stencil attachment.
    DepthStencilAttachmentOptimal = DEPTH_STENCIL_ATTACHMENT_OPTIMAL,

    /// For a depth/stencil image used as a read-only attachment or sampled in a shader.
    DepthStencilReadOnlyOptimal = DEPTH_STENCIL_READ_ONLY_OPTIMAL,

    /// For a color image sampled or used as an input attachment in a shader.
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,

    /// For operations that transfer data from an image (copy, blit).
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,

    /// For operations that transfer data to an image (copy, blit, clear).
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,

    /// Linear-tiled image data written directly by the host.
    Preinitialized = PREINITIALIZED,

    /// Read-only depth aspect, attachment stencil aspect.
    DepthReadOnlyStencilAttachmentOptimal = DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL,

    /// Attachment depth aspect, read-only stencil aspect.
    DepthAttachmentStencilReadOnlyOptimal = DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL,

    /// The depth aspect used as an attachment.
    DepthAttachmentOptimal = DEPTH_ATTACHMENT_OPTIMAL,

    /// The depth aspect used read-only.
    DepthReadOnlyOptimal = DEPTH_READ_ONLY_OPTIMAL,

    /// The stencil aspect used as an attachment.
    StencilAttachmentOptimal = STENCIL_ATTACHMENT_OPTIMAL,

    /// The stencil aspect used read-only.
    StencilReadOnlyOptimal = STENCIL_READ_ONLY_OPTIMAL,

    /// Generic read-only layout; resolves to an aspect-specific layout.
    ReadOnlyOptimal = READ_ONLY_OPTIMAL,

    /// Generic attachment layout; resolves to an aspect-specific layout.
    AttachmentOptimal = ATTACHMENT_OPTIMAL,

    /// Swapchain images waiting to be presented.
    PresentSrc = PRESENT_SRC_KHR,

    /// Shared presentable images.
    SharedPresent = SHARED_PRESENT_KHR,

    /// Fragment density map attachments.
    FragmentDensityMapOptimal = FRAGMENT_DENSITY_MAP_OPTIMAL_EXT,

    /// Fragment shading rate attachments.
    FragmentShadingRateAttachmentOptimal = FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR,

    /// Attachments that are also read in the same render pass.
    AttachmentFeedbackLoopOptimal = ATTACHMENT_FEEDBACK_LOOP_OPTIMAL_EXT,
}

impl ImageLayout {
    /// Resolves the two generic synchronization2 layouts, `AttachmentOptimal` and
    /// `ReadOnlyOptimal`, to the concrete layout they stand for when used with exactly
    /// `aspects`. Other layouts, and aspect sets that are not exactly color, depth, stencil or
    /// depth+stencil, are returned unchanged.
    pub fn normalize_for_aspects(self, aspects: ImageAspects) -> ImageLayout {
        const DEPTH_STENCIL: ImageAspects = ImageAspects::DEPTH.union(ImageAspects::STENCIL);

        match self {
            ImageLayout::AttachmentOptimal => match aspects {
                ImageAspects::COLOR => ImageLayout::ColorAttachmentOptimal,
                DEPTH_STENCIL => ImageLayout::DepthStencilAttachmentOptimal,
                ImageAspects::DEPTH => ImageLayout::DepthAttachmentOptimal,
                ImageAspects::STENCIL => ImageLayout::StencilAttachmentOptimal,
                _ => self,
            },
            ImageLayout::ReadOnlyOptimal => match aspects {
                ImageAspects::COLOR => ImageLayout::ShaderReadOnlyOptimal,
                DEPTH_STENCIL => ImageLayout::DepthStencilReadOnlyOptimal,
                ImageAspects::DEPTH => ImageLayout::DepthReadOnlyOptimal,
                ImageAspects::STENCIL => ImageLayout::StencilReadOnlyOptimal,
                _ => self,
            },
            _ => self,
        }
    }

    /// Reduces a combined depth/stencil layout to what it means for the depth aspect alone.
    pub fn depth_component(self) -> ImageLayout {
        match self {
            ImageLayout::DepthStencilAttachmentOptimal
            | ImageLayout::DepthAttachmentStencilReadOnlyOptimal => {
                ImageLayout::DepthAttachmentOptimal
            }
            ImageLayout::DepthStencilReadOnlyOptimal
            | ImageLayout::DepthReadOnlyStencilAttachmentOptimal => {
                ImageLayout::DepthReadOnlyOptimal
            }
            _ => self,
        }
    }

    /// Reduces a combined depth/stencil layout to what it means for the stencil aspect alone.
    pub fn stencil_component(self) -> ImageLayout {
        match self {
            ImageLayout::DepthStencilAttachmentOptimal
            | ImageLayout::DepthReadOnlyStencilAttachmentOptimal => {
                ImageLayout::StencilAttachmentOptimal
            }
            ImageLayout::DepthStencilReadOnlyOptimal
            | ImageLayout::DepthAttachmentStencilReadOnlyOptimal => {
                ImageLayout::StencilReadOnlyOptimal
            }
            _ => self,
        }
    }
}

/// Returns whether `a` and `b` denote the same effective layout for subresources of `aspects`.
///
/// Layouts match if they are equal, if they are equal after resolving the generic
/// synchronization2 layouts, or, when `aspects` is exactly depth, stencil or depth+stencil, if
/// every selected aspect sees the same layout once combined depth/stencil layouts are split into
/// their per-aspect parts.
pub fn layouts_match(aspects: ImageAspects, a: ImageLayout, b: ImageLayout) -> bool {
    if a == b {
        return true;
    }

    let a = a.normalize_for_aspects(aspects);
    let b = b.normalize_for_aspects(aspects);

    if a == b {
        return true;
    }

    if !aspects.is_depth_stencil_only() {
        return false;
    }

    (!aspects.intersects(ImageAspects::DEPTH) || a.depth_component() == b.depth_component())
        && (!aspects.intersects(ImageAspects::STENCIL)
            || a.stencil_component() == b.stencil_component())
}
