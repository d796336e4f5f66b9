//! Recording-side layout state of command buffers.
//!
//! While a command buffer is recorded, every command that uses an image tells the
//! [`CommandBufferState`] which subresources it touches and in which layout:
//!
//! - [`track_first_use`] records the layout a command *expects* subresources to be in, without
//!   changing it. Only the first expectation recorded for a subresource is kept.
//! - [`set_current_layout`] records a layout transition, such as an image memory barrier or the
//!   final layout of a render pass attachment.
//!
//! The recorded state is checked against the actual layouts of the images when the command
//! buffer is submitted, see [`validate_cmd_buf_image_layouts`].
//!
//! [`track_first_use`]: CommandBufferState::track_first_use
//! [`set_current_layout`]: CommandBufferState::set_current_layout

pub use self::submit::{
    update_cmd_buf_image_layouts, validate_cmd_buf_image_layouts, LayoutMismatch,
    LayoutMismatchSource, OverlayLayoutMaps,
};
use crate::{
    image::{
        layouts_match, Image, ImageAspects, ImageLayout, ImageLayoutRegistry,
        ImageSubresourceLayers, ImageSubresourceRange, ImageView, LayoutEntry, Subresource,
        SubresourceRangeFactory, SubresourceRangeIterator,
    },
    macros::vulkan_enum,
    NonExhaustive, VulkanObject,
};
use foldhash::HashMap;
use std::{
    fmt::{Display, Error as FmtError, Formatter},
    num::NonZero,
    sync::Arc,
};
use thiserror::Error;

mod submit;

/// The layout state recorded into a single command buffer.
#[derive(Debug)]
pub struct CommandBufferState {
    handle: ash::vk::CommandBuffer,
    level: CommandBufferLevel,
    image_layout_registries: HashMap<ash::vk::Image, ImageLayoutRegistry>,
    diagnostic_id: Option<NonZero<u64>>,
}

impl CommandBufferState {
    /// Starts tracking the command buffer with the given handle.
    pub fn new(handle: ash::vk::CommandBuffer, create_info: &CommandBufferCreateInfo) -> Self {
        let &CommandBufferCreateInfo { level, _ne: _ } = create_info;

        CommandBufferState {
            handle,
            level,
            image_layout_registries: HashMap::default(),
            diagnostic_id: None,
        }
    }

    #[inline]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Returns the tag that layouts recorded from now on are given.
    #[inline]
    pub fn diagnostic_id(&self) -> Option<NonZero<u64>> {
        self.diagnostic_id
    }

    /// Tags the layouts recorded from now on, typically with an identifier of the command being
    /// recorded. The tag of a first use is reported in any [`LayoutMismatch`] it causes.
    #[inline]
    pub fn set_diagnostic_id(&mut self, diagnostic_id: Option<NonZero<u64>>) {
        self.diagnostic_id = diagnostic_id;
    }

    /// Returns the registries of every image the command buffer has touched.
    #[inline]
    pub fn image_layout_registries(&self) -> impl Iterator<Item = &ImageLayoutRegistry> {
        self.image_layout_registries.values()
    }

    /// Returns the registry of `image`, if the command buffer has touched this image.
    ///
    /// A registry recorded for an earlier image with the same handle is not returned.
    pub fn image_layout_registry(&self, image: &Image) -> Option<&ImageLayoutRegistry> {
        self.image_layout_registries
            .get(&image.handle())
            .filter(|registry| registry.image_id() == image.generation_id())
    }

    /// Returns the registry of `image`, creating it if the command buffer has not touched the
    /// image yet.
    ///
    /// If the handle of `image` belonged to an image that has since been destroyed, the layouts
    /// recorded for the old image are discarded.
    pub fn get_or_create_registry(&mut self, image: &Arc<Image>) -> &mut ImageLayoutRegistry {
        let handle = self.handle;
        let registry = self
            .image_layout_registries
            .entry(image.handle())
            .or_insert_with(|| {
                log::debug!(
                    "command buffer {:?}: tracking layouts of image {:?}",
                    handle,
                    image.handle(),
                );

                ImageLayoutRegistry::new(image)
            });

        if registry.image_id() != image.generation_id() {
            log::debug!(
                "command buffer {:?}: image {:?} was recreated, discarding layouts recorded for \
                generation {}",
                handle,
                image.handle(),
                registry.image_id(),
            );

            *registry = ImageLayoutRegistry::new(image);
        }

        registry
    }

    /// Records that the command buffer uses the selected subresources of `image` while they
    /// are in `layout`, without transitioning them.
    ///
    /// Subresources that already have a recorded layout are left untouched.
    pub fn track_first_use(
        &mut self,
        image: &Arc<Image>,
        selection: &(impl SubresourceRangeFactory + ?Sized),
        layout: ImageLayout,
        aspects: ImageAspects,
    ) {
        let Some(ranges) = self.selection_ranges(image, selection) else {
            return;
        };

        log::trace!(
            "command buffer {:?}: first use of image {:?} ({:?}) in layout {:?}",
            self.handle,
            image.handle(),
            aspects,
            layout,
        );

        let entry = LayoutEntry::first_use(layout, aspects).with_diagnostic_id(self.diagnostic_id);
        self.get_or_create_registry(image).update(ranges, &entry);
    }

    /// Records a transition of the selected subresources of `image` into `layout`.
    ///
    /// For subresources that the command buffer has not used before, `expected` is the layout
    /// they must be in before the transition; if it is `None`, `layout` is expected.
    pub fn set_current_layout(
        &mut self,
        image: &Arc<Image>,
        selection: &(impl SubresourceRangeFactory + ?Sized),
        layout: ImageLayout,
        expected: Option<ImageLayout>,
    ) {
        let Some(ranges) = self.selection_ranges(image, selection) else {
            return;
        };
        let aspects = ranges.aspects();

        log::trace!(
            "command buffer {:?}: image {:?} ({:?}) transitions to layout {:?}",
            self.handle,
            image.handle(),
            aspects,
            layout,
        );

        let entry = LayoutEntry::transition(layout, expected, aspects)
            .with_diagnostic_id(self.diagnostic_id);
        self.get_or_create_registry(image).update(ranges, &entry);
    }

    /// Records the layout that whole array layers of a single mip level must be in when the
    /// command buffer begins using them.
    #[inline]
    pub fn set_image_initial_layout(
        &mut self,
        image: &Arc<Image>,
        subresource_layers: &ImageSubresourceLayers,
        layout: ImageLayout,
    ) {
        self.track_first_use(image, subresource_layers, layout, subresource_layers.aspects);
    }

    /// Records the layout that the subresources of `view` must be in when the command buffer
    /// begins using them.
    #[inline]
    pub fn set_image_view_initial_layout(&mut self, view: &ImageView, layout: ImageLayout) {
        self.track_first_use(
            view.image(),
            view,
            layout,
            view.subresource_range().aspects,
        );
    }

    /// Records a transition of the subresources of `view` into `layout`.
    ///
    /// If `stencil_layout` is given and the view includes the stencil aspect, the stencil
    /// aspect transitions to `stencil_layout` instead, and the other aspects to `layout`.
    pub fn set_image_view_layout(
        &mut self,
        view: &ImageView,
        layout: ImageLayout,
        stencil_layout: Option<ImageLayout>,
    ) {
        let image = view.image();
        let subresource_range = view.subresource_range();

        match stencil_layout {
            Some(stencil_layout) if subresource_range.aspects.intersects(ImageAspects::STENCIL) => {
                let other_aspects = subresource_range.aspects - ImageAspects::STENCIL;

                if !other_aspects.is_empty() {
                    let other_range = ImageSubresourceRange {
                        aspects: other_aspects,
                        ..subresource_range.clone()
                    };
                    self.set_current_layout(image, &other_range, layout, None);
                }

                let stencil_range = ImageSubresourceRange {
                    aspects: ImageAspects::STENCIL,
                    ..subresource_range.clone()
                };
                self.set_current_layout(image, &stencil_range, stencil_layout, None);
            }
            _ => self.set_current_layout(image, view, layout, None),
        }
    }

    /// Checks that every selected subresource that the command buffer has already used is in
    /// a layout matching `expected`. The layout of a subresource is its current layout if the
    /// command buffer transitioned it, and its first-use layout otherwise.
    ///
    /// Returns the first subresource found in another layout.
    pub fn verify_image_layout(
        &self,
        image: &Image,
        selection: &(impl SubresourceRangeFactory + ?Sized),
        expected: ImageLayout,
    ) -> Result<(), LayoutCheckFailure> {
        let Some(registry) = self.image_layout_registry(image) else {
            return Ok(());
        };
        let Some(ranges) = self.selection_ranges(image, selection) else {
            return Ok(());
        };

        let encoder = image.subresource_encoder();
        let mut failure = None;

        registry.any_in_range(ranges, |range, entry| {
            let (layout, origin) = match entry.current_layout {
                Some(current) => (current, RecordedLayout::Current),
                None => (entry.first_layout, RecordedLayout::FirstUse),
            };

            // Every subresource of the range shares the entry, but the aspect decides how
            // layouts compare.
            let mismatch = range.clone().find_map(|index| {
                let subresource = encoder.decode(index);

                (!layouts_match(subresource.aspect.into(), layout, expected)).then_some(
                    LayoutCheckFailure {
                        subresource,
                        expected_layout: expected,
                        layout,
                        origin,
                    },
                )
            });
            failure = mismatch;

            failure.is_some()
        });

        failure.map_or(Ok(()), Err)
    }

    /// Appends the layout state of a secondary command buffer that this command buffer
    /// executes.
    ///
    /// Subresources that this command buffer has not used yet take over the expectations of the
    /// secondary command buffer. The layouts that the secondary command buffer leaves
    /// subresources in become the current layouts.
    pub fn execute_commands(&mut self, secondary: &CommandBufferState) {
        for secondary_registry in secondary.image_layout_registries.values() {
            let Some(image) = secondary_registry.image() else {
                continue;
            };

            let registry = self.get_or_create_registry(&image);

            for (range, entry) in secondary_registry.layouts().iter() {
                registry.update([range], entry);
            }
        }
    }

    /// Forgets everything recorded into the command buffer.
    pub fn reset(&mut self) {
        log::debug!("command buffer {:?}: reset", self.handle);

        self.image_layout_registries.clear();
        self.diagnostic_id = None;
    }

    fn selection_ranges(
        &self,
        image: &Image,
        selection: &(impl SubresourceRangeFactory + ?Sized),
    ) -> Option<SubresourceRangeIterator> {
        match selection.subresource_ranges(image) {
            Ok(ranges) => Some(ranges),
            Err(err) => {
                log::error!(
                    "command buffer {:?}: ignoring non-compliant selection of image {:?}: {}",
                    self.handle,
                    image.handle(),
                    err,
                );

                None
            }
        }
    }
}

impl VulkanObject for CommandBufferState {
    type Handle = ash::vk::CommandBuffer;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

/// Parameters to start tracking a command buffer.
#[derive(Clone, Debug)]
pub struct CommandBufferCreateInfo {
    /// The level of the command buffer.
    ///
    /// The default value is [`CommandBufferLevel::Primary`].
    pub level: CommandBufferLevel,

    pub _ne: NonExhaustive,
}

impl Default for CommandBufferCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            level: CommandBufferLevel::Primary,
            _ne: NonExhaustive(()),
        }
    }
}

vulkan_enum! {
    /// The level of a command buffer.
    CommandBufferLevel = CommandBufferLevel(i32);

    /// Submitted directly to a queue.
    Primary = PRIMARY,

    /// Executed from a primary command buffer.
    Secondary = SECONDARY,
}

/// A subresource that a command buffer has already used in another layout than the one required.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error(
    "{subresource:?} is in layout {layout:?} ({origin}), but layout {expected_layout:?} is \
    required"
)]
pub struct LayoutCheckFailure {
    pub subresource: Subresource,
    pub expected_layout: ImageLayout,
    pub layout: ImageLayout,
    pub origin: RecordedLayout,
}

/// Where the layout of a subresource inside a command buffer comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordedLayout {
    /// The command buffer transitioned the subresource into the layout.
    Current,

    /// The command buffer expects the subresource to be in the layout when it begins.
    FirstUse,
}

impl Display for RecordedLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            RecordedLayout::Current => write!(f, "current layout"),
            RecordedLayout::FirstUse => write!(f, "layout on first use"),
        }
    }
}
