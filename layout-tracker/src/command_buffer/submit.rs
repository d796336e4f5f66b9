//! Submit-time validation and commit of recorded layouts.
//!
//! When a batch of command buffers is submitted, each command buffer is validated in
//! submission order with [`validate_cmd_buf_image_layouts`]. The layouts a command buffer
//! leaves images in are folded into a caller-owned [`OverlayLayoutMaps`], so that later command
//! buffers of the same batch are checked against them rather than against the durable global
//! maps, which only change once the batch is accepted and [`update_cmd_buf_image_layouts`] is
//! called.

use super::CommandBufferState;
use crate::{
    image::{
        layouts_match, GlobalImageLayoutMap, GlobalLayoutUpdater, Image, ImageLayout,
        ImageLayoutRegistry, Subresource,
    },
    range_map::ParallelIterator,
    VulkanObject,
};
use foldhash::HashMap;
use std::{
    cmp,
    fmt::{Display, Error as FmtError, Formatter},
    num::NonZero,
};
use thiserror::Error;

/// The layouts that the command buffers validated so far in a batch leave images in.
///
/// Entries are keyed by image handle and tagged with the generation id of the image, so an
/// image that reuses the handle of a destroyed one starts from an empty overlay.
#[derive(Debug, Default)]
pub struct OverlayLayoutMaps {
    maps: HashMap<ash::vk::Image, OverlayLayoutMap>,
}

#[derive(Debug)]
struct OverlayLayoutMap {
    image_id: NonZero<u64>,
    layouts: GlobalImageLayoutMap,
}

impl OverlayLayoutMaps {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the overlay of `image`, if a validated command buffer touched it.
    pub fn get(&self, image: &Image) -> Option<&GlobalImageLayoutMap> {
        self.maps
            .get(&image.handle())
            .filter(|overlay| overlay.image_id == image.generation_id())
            .map(|overlay| &overlay.layouts)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Forgets every overlay, to start a new batch.
    #[inline]
    pub fn clear(&mut self) {
        self.maps.clear();
    }

    fn get_or_create(&mut self, image: &Image) -> &mut GlobalImageLayoutMap {
        let overlay = self
            .maps
            .entry(image.handle())
            .or_insert_with(|| OverlayLayoutMap {
                image_id: image.generation_id(),
                layouts: GlobalImageLayoutMap::new(),
            });

        if overlay.image_id != image.generation_id() {
            log::debug!(
                "image {:?} was recreated, discarding its overlay for generation {}",
                image.handle(),
                overlay.image_id,
            );

            *overlay = OverlayLayoutMap {
                image_id: image.generation_id(),
                layouts: GlobalImageLayoutMap::new(),
            };
        }

        &mut overlay.layouts
    }
}

/// Checks the first-use layouts recorded into `command_buffer` against the layouts its images
/// are in, and folds the layouts it leaves images in into `overlays`.
///
/// The layout an image is in is taken from `overlays` where an earlier command buffer of the
/// batch left it in a known layout, and from the global layout map of the image otherwise.
/// Subresources whose layout is unknown in both, and first uses in
/// [`ImageLayout::Undefined`], are not checked. Images with external memory are skipped
/// entirely.
///
/// Returns one [`LayoutMismatch`] per subresource that is not in the expected layout.
pub fn validate_cmd_buf_image_layouts(
    command_buffer: &CommandBufferState,
    overlays: &mut OverlayLayoutMaps,
) -> Vec<LayoutMismatch> {
    let mut mismatches = Vec::new();

    for registry in command_buffer.image_layout_registries() {
        if registry.is_empty() {
            continue;
        }

        let Some(image) = registry.image() else {
            log::trace!(
                "command buffer {:?}: image {:?} no longer exists, skipping",
                command_buffer.handle(),
                registry.image_handle(),
            );
            continue;
        };

        if !image.external_memory_handle_types().is_empty() {
            continue;
        }

        let overlay = overlays.get_or_create(&image);
        let found = mismatches.len();

        validate_registry(
            command_buffer.handle(),
            &image,
            registry,
            overlay,
            &image.layouts().read(),
            &mut mismatches,
        );

        if mismatches.len() > found {
            log::warn!(
                "command buffer {:?}: {} subresources of image {:?} are not in the expected layout",
                command_buffer.handle(),
                mismatches.len() - found,
                image.handle(),
            );
        }

        overlay.splice(registry.layouts(), &GlobalLayoutUpdater);
    }

    mismatches
}

/// Walks the entries of `registry` in order, with a cursor over (`overlay`, `global`) that is
/// kept at the start of the part of the entry being checked.
fn validate_registry(
    command_buffer: ash::vk::CommandBuffer,
    image: &Image,
    registry: &ImageLayoutRegistry,
    overlay: &GlobalImageLayoutMap,
    global: &GlobalImageLayoutMap,
    mismatches: &mut Vec<LayoutMismatch>,
) {
    let encoder = image.subresource_encoder();
    let mut entries = registry.layouts().iter();

    let Some((mut range, mut entry)) = entries.next() else {
        return;
    };
    let mut cursor = ParallelIterator::new(overlay, global, range.start);

    loop {
        if entry.first_layout != ImageLayout::Undefined {
            // Nothing is known about this subresource or any later one.
            if cursor.range().is_empty() {
                break;
            }

            let intersected = cursor.range().start..cmp::min(cursor.range().end, range.end);
            let previous = match (cursor.pos_a(), cursor.pos_b()) {
                (Some(&layout), _) => Some((layout, LayoutMismatchSource::PreviouslyUsed)),
                (None, Some(&layout)) => Some((layout, LayoutMismatchSource::PreviousKnown)),
                (None, None) => None,
            };

            if let Some((actual_layout, source)) = previous {
                for index in intersected.clone() {
                    let subresource = encoder.decode(index);

                    if !layouts_match(subresource.aspect.into(), entry.first_layout, actual_layout)
                    {
                        mismatches.push(LayoutMismatch {
                            command_buffer,
                            image: image.handle(),
                            subresource,
                            expected_layout: entry.first_layout,
                            actual_layout,
                            layout_source: source,
                            diagnostic_id: entry.diagnostic_id,
                        });
                    }
                }
            }

            if intersected.end < range.end {
                cursor.seek(intersected.end);
                continue;
            }
        }

        let Some((next_range, next_entry)) = entries.next() else {
            break;
        };
        range = next_range;
        entry = next_entry;
        cursor.seek(range.start);
    }
}

/// Commits the layouts that `command_buffer` leaves images in to the global layout maps of the
/// images.
///
/// Registries recorded for images that have since been destroyed or recreated are ignored.
pub fn update_cmd_buf_image_layouts(command_buffer: &CommandBufferState) {
    for registry in command_buffer.image_layout_registries() {
        if registry.is_empty() {
            continue;
        }

        let Some(image) = registry.image() else {
            continue;
        };

        let changed = image
            .layouts()
            .write()
            .splice(registry.layouts(), &GlobalLayoutUpdater);

        log::debug!(
            "command buffer {:?}: committed layouts of image {:?}{}",
            command_buffer.handle(),
            image.handle(),
            if changed { "" } else { " (unchanged)" },
        );
    }
}

/// A subresource that a command buffer expects to be in another layout than the one it is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error(
    "command buffer {command_buffer:?} expects {subresource:?} of image {image:?} to be in layout \
    {expected_layout:?}, but its {layout_source} layout is {actual_layout:?}"
)]
pub struct LayoutMismatch {
    pub command_buffer: ash::vk::CommandBuffer,
    pub image: ash::vk::Image,
    pub subresource: Subresource,

    /// The layout the command buffer expects on first use.
    pub expected_layout: ImageLayout,

    /// The layout the subresource is in.
    pub actual_layout: ImageLayout,

    /// Where `actual_layout` comes from.
    pub layout_source: LayoutMismatchSource,

    /// The tag of the recording site of the first use, if one was given.
    pub diagnostic_id: Option<NonZero<u64>>,
}

/// Where the layout of a mismatched subresource was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutMismatchSource {
    /// The global layout map of the image.
    PreviousKnown,

    /// The layout left by an earlier command buffer of the same batch.
    PreviouslyUsed,
}

impl Display for LayoutMismatchSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            LayoutMismatchSource::PreviousKnown => write!(f, "previous known"),
            LayoutMismatchSource::PreviouslyUsed => write!(f, "previously used"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_buffer::CommandBufferCreateInfo,
        image::{
            ImageAspect, ImageAspects, ImageCreateInfo, ImageSubresourceLayers,
            ImageSubresourceRange,
        },
        memory::ExternalMemoryHandleTypes,
    };
    use ash::vk::Handle;
    use std::sync::Arc;

    fn command_buffer(handle: u64) -> CommandBufferState {
        CommandBufferState::new(
            ash::vk::CommandBuffer::from_raw(handle),
            &CommandBufferCreateInfo::default(),
        )
    }

    fn color_image(handle: u64, array_layers: u32) -> Arc<Image> {
        Image::new(
            ash::vk::Image::from_raw(handle),
            &ImageCreateInfo {
                array_layers,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn layer(array_layer: u32) -> ImageSubresourceLayers {
        ImageSubresourceLayers {
            aspects: ImageAspects::COLOR,
            mip_level: 0,
            array_layers: array_layer..array_layer + 1,
        }
    }

    fn color(array_layer: u32) -> Subresource {
        Subresource {
            aspect: ImageAspect::Color,
            mip_level: 0,
            array_layer,
        }
    }

    /// Commits a command buffer that transitions `selection` of `image` from undefined.
    fn seed(image: &Arc<Image>, selection: &ImageSubresourceRange, layout: ImageLayout) {
        let mut cb = command_buffer(99);
        cb.set_current_layout(image, selection, layout, Some(ImageLayout::Undefined));
        update_cmd_buf_image_layouts(&cb);
    }

    #[test]
    fn undefined_first_use_then_commit() {
        let image = color_image(1, 1);
        let range = image.subresource_range();

        let mut cb = command_buffer(1);
        cb.track_first_use(&image, &range, ImageLayout::Undefined, ImageAspects::COLOR);
        cb.set_current_layout(&image, &range, ImageLayout::TransferDstOptimal, None);

        let mut overlays = OverlayLayoutMaps::new();
        assert!(validate_cmd_buf_image_layouts(&cb, &mut overlays).is_empty());
        assert_eq!(image.current_layout(&color(0)), None);

        update_cmd_buf_image_layouts(&cb);
        assert_eq!(
            image.current_layout(&color(0)),
            Some(ImageLayout::TransferDstOptimal),
        );
    }

    #[test]
    fn mismatch_against_global_layout() {
        let image = color_image(2, 3);
        seed(&image, &image.subresource_range(), ImageLayout::ShaderReadOnlyOptimal);

        let mut cb = command_buffer(2);
        cb.track_first_use(
            &image,
            &layer(1),
            ImageLayout::ColorAttachmentOptimal,
            ImageAspects::COLOR,
        );

        let mismatches = validate_cmd_buf_image_layouts(&cb, &mut OverlayLayoutMaps::new());
        assert_eq!(
            mismatches,
            [LayoutMismatch {
                command_buffer: cb.handle(),
                image: image.handle(),
                subresource: color(1),
                expected_layout: ImageLayout::ColorAttachmentOptimal,
                actual_layout: ImageLayout::ShaderReadOnlyOptimal,
                layout_source: LayoutMismatchSource::PreviousKnown,
                diagnostic_id: None,
            }],
        );
    }

    #[test]
    fn mismatch_carries_diagnostic_id() {
        let image = color_image(16, 2);
        seed(&image, &image.subresource_range(), ImageLayout::TransferSrcOptimal);

        let mut cb = command_buffer(16);
        cb.set_diagnostic_id(NonZero::new(7));
        cb.track_first_use(
            &image,
            &layer(0),
            ImageLayout::ShaderReadOnlyOptimal,
            ImageAspects::COLOR,
        );
        cb.set_diagnostic_id(None);
        cb.track_first_use(&image, &layer(1), ImageLayout::General, ImageAspects::COLOR);

        // A later transition keeps the tag of the first use.
        cb.set_diagnostic_id(NonZero::new(8));
        cb.set_current_layout(&image, &layer(0), ImageLayout::General, None);

        let mismatches = validate_cmd_buf_image_layouts(&cb, &mut OverlayLayoutMaps::new());
        assert_eq!(
            mismatches
                .iter()
                .map(|m| (m.subresource, m.diagnostic_id))
                .collect::<Vec<_>>(),
            [(color(0), NonZero::<u64>::new(7)), (color(1), None)],
        );

        cb.reset();
        assert_eq!(cb.diagnostic_id(), None);
    }

    #[test]
    fn separate_depth_stencil_transitions() {
        let image = Image::new(
            ash::vk::Image::from_raw(3),
            &ImageCreateInfo {
                format_aspects: ImageAspects::DEPTH | ImageAspects::STENCIL,
                ..Default::default()
            },
        )
        .unwrap();
        let whole = image.subresource_range();

        let mut cb = command_buffer(3);
        cb.set_current_layout(
            &image,
            &ImageSubresourceRange {
                aspects: ImageAspects::DEPTH,
                ..whole.clone()
            },
            ImageLayout::DepthAttachmentOptimal,
            Some(ImageLayout::Undefined),
        );
        cb.set_current_layout(
            &image,
            &ImageSubresourceRange {
                aspects: ImageAspects::STENCIL,
                ..whole.clone()
            },
            ImageLayout::StencilReadOnlyOptimal,
            Some(ImageLayout::Undefined),
        );
        update_cmd_buf_image_layouts(&cb);

        let mut cb = command_buffer(4);
        cb.track_first_use(
            &image,
            &whole,
            ImageLayout::DepthAttachmentStencilReadOnlyOptimal,
            whole.aspects,
        );
        assert!(validate_cmd_buf_image_layouts(&cb, &mut OverlayLayoutMaps::new()).is_empty());

        // A fully read-only access does disagree on the depth aspect.
        let mut cb = command_buffer(5);
        cb.track_first_use(
            &image,
            &whole,
            ImageLayout::DepthStencilReadOnlyOptimal,
            whole.aspects,
        );
        let mismatches = validate_cmd_buf_image_layouts(&cb, &mut OverlayLayoutMaps::new());
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].subresource.aspect, ImageAspect::Depth);
        assert_eq!(mismatches[0].actual_layout, ImageLayout::DepthAttachmentOptimal);
    }

    #[test]
    fn overlay_carries_layouts_within_a_batch() {
        let image = color_image(6, 2);
        seed(&image, &image.subresource_range(), ImageLayout::TransferDstOptimal);

        let mut first = command_buffer(6);
        first.set_current_layout(
            &image,
            &image.subresource_range(),
            ImageLayout::ShaderReadOnlyOptimal,
            Some(ImageLayout::TransferDstOptimal),
        );

        let mut second = command_buffer(7);
        second.track_first_use(
            &image,
            &image.subresource_range(),
            ImageLayout::ShaderReadOnlyOptimal,
            ImageAspects::COLOR,
        );

        let mut overlays = OverlayLayoutMaps::new();
        assert!(validate_cmd_buf_image_layouts(&first, &mut overlays).is_empty());
        assert!(validate_cmd_buf_image_layouts(&second, &mut overlays).is_empty());
        assert_eq!(
            overlays.get(&image).unwrap().get(&0),
            Some(&ImageLayout::ShaderReadOnlyOptimal),
        );

        // Without the first command buffer, the global map disagrees.
        let mismatches = validate_cmd_buf_image_layouts(&second, &mut OverlayLayoutMaps::new());
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches
            .iter()
            .all(|m| m.layout_source == LayoutMismatchSource::PreviousKnown));

        // The global map only changes on commit.
        assert_eq!(
            image.current_layout(&color(1)),
            Some(ImageLayout::TransferDstOptimal),
        );
    }

    #[test]
    fn overlay_mismatch_is_previously_used() {
        let image = color_image(8, 4);

        let mut first = command_buffer(8);
        first.set_current_layout(
            &image,
            &ImageSubresourceRange {
                aspects: ImageAspects::COLOR,
                mip_levels: 0..1,
                array_layers: 1..3,
            },
            ImageLayout::TransferSrcOptimal,
            Some(ImageLayout::Undefined),
        );

        let mut second = command_buffer(9);
        second.track_first_use(
            &image,
            &image.subresource_range(),
            ImageLayout::General,
            ImageAspects::COLOR,
        );

        let mut overlays = OverlayLayoutMaps::new();
        assert!(validate_cmd_buf_image_layouts(&first, &mut overlays).is_empty());

        // Layers 0 and 3 have never been transitioned, so nothing is known about them.
        let mismatches = validate_cmd_buf_image_layouts(&second, &mut overlays);
        assert_eq!(
            mismatches
                .iter()
                .map(|m| (m.subresource, m.layout_source))
                .collect::<Vec<_>>(),
            [
                (color(1), LayoutMismatchSource::PreviouslyUsed),
                (color(2), LayoutMismatchSource::PreviouslyUsed),
            ],
        );
    }

    #[test]
    fn entries_split_across_cursor_steps() {
        let image = color_image(10, 6);
        seed(
            &image,
            &ImageSubresourceRange {
                aspects: ImageAspects::COLOR,
                mip_levels: 0..1,
                array_layers: 0..2,
            },
            ImageLayout::General,
        );
        seed(
            &image,
            &ImageSubresourceRange {
                aspects: ImageAspects::COLOR,
                mip_levels: 0..1,
                array_layers: 4..6,
            },
            ImageLayout::TransferSrcOptimal,
        );

        // One entry spans two known ranges and a hole between them.
        let mut cb = command_buffer(10);
        cb.track_first_use(
            &image,
            &image.subresource_range(),
            ImageLayout::General,
            ImageAspects::COLOR,
        );

        let mismatches = validate_cmd_buf_image_layouts(&cb, &mut OverlayLayoutMaps::new());
        assert_eq!(
            mismatches.iter().map(|m| m.subresource).collect::<Vec<_>>(),
            [color(4), color(5)],
        );
    }

    #[test]
    fn skipped_images() {
        let external = Image::new(
            ash::vk::Image::from_raw(11),
            &ImageCreateInfo {
                external_memory_handle_types: ExternalMemoryHandleTypes::DMA_BUF,
                initial_layout: Some(ImageLayout::General),
                ..Default::default()
            },
        )
        .unwrap();
        let destroyed = color_image(12, 1);
        seed(&destroyed, &destroyed.subresource_range(), ImageLayout::General);

        let mut cb = command_buffer(11);
        for image in [&external, &destroyed] {
            cb.track_first_use(
                image,
                &image.subresource_range(),
                ImageLayout::PresentSrc,
                ImageAspects::COLOR,
            );
        }
        drop(destroyed);

        let mut overlays = OverlayLayoutMaps::new();
        assert!(validate_cmd_buf_image_layouts(&cb, &mut overlays).is_empty());
        assert!(overlays.is_empty());
    }

    #[test]
    fn overlay_is_tagged_with_generation() {
        let mut overlays = OverlayLayoutMaps::new();

        let image = color_image(13, 1);
        let mut cb = command_buffer(13);
        cb.set_current_layout(
            &image,
            &image.subresource_range(),
            ImageLayout::TransferDstOptimal,
            Some(ImageLayout::Undefined),
        );
        assert!(validate_cmd_buf_image_layouts(&cb, &mut overlays).is_empty());
        assert!(overlays.get(&image).is_some());
        drop(image);

        let image = color_image(13, 1);
        assert!(overlays.get(&image).is_none());

        let mut cb = command_buffer(14);
        cb.track_first_use(
            &image,
            &image.subresource_range(),
            ImageLayout::ColorAttachmentOptimal,
            ImageAspects::COLOR,
        );
        assert!(validate_cmd_buf_image_layouts(&cb, &mut overlays).is_empty());

        overlays.clear();
        assert!(overlays.is_empty());
    }

    #[test]
    fn commit_skips_recreated_image() {
        let image = color_image(15, 1);
        let mut cb = command_buffer(15);
        cb.set_current_layout(
            &image,
            &image.subresource_range(),
            ImageLayout::General,
            None,
        );
        drop(image);

        let image = color_image(15, 1);
        update_cmd_buf_image_layouts(&cb);
        assert!(image.global_layouts().is_empty());
    }

    #[test]
    fn mismatch_display() {
        let mismatch = LayoutMismatch {
            command_buffer: ash::vk::CommandBuffer::from_raw(1),
            image: ash::vk::Image::from_raw(2),
            subresource: color(0),
            expected_layout: ImageLayout::ColorAttachmentOptimal,
            actual_layout: ImageLayout::ShaderReadOnlyOptimal,
            layout_source: LayoutMismatchSource::PreviousKnown,
            diagnostic_id: None,
        };
        let message = mismatch.to_string();
        assert!(message.contains("ColorAttachmentOptimal"));
        assert!(message.contains("previous known layout is ShaderReadOnlyOptimal"));
    }
}
