//! Range maps of image layouts.
//!
//! Two kinds of map exist for every image:
//!
//! - One [`ImageLayoutRegistry`] per command buffer that uses the image. It records, for each
//!   subresource, the layout the command buffer expects on first use, and the layout the
//!   command buffer leaves it in.
//! - One [`GlobalImageLayoutMap`] per image, owned by the [`Image`] itself. It holds the layout
//!   each subresource is in once all committed command buffers have executed.

use super::{layouts_match, Image, ImageAspects, ImageLayout};
use crate::{
    range_map::{InfillUpdateOps, RangeMap, SpliceOps},
    DeviceSize, VulkanObject,
};
use std::{
    num::NonZero,
    ops::Range,
    sync::{Arc, Weak},
};

/// The durable layout of each subresource of an image, indexed by flattened subresource.
pub type GlobalImageLayoutMap = RangeMap<DeviceSize, ImageLayout>;

/// The layout state that a command buffer recorded for a range of subresources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutEntry {
    /// The layout that the command buffer expects the subresources to be in when it begins
    /// using them. `Undefined` means that the previous contents are discarded, so any layout
    /// is accepted.
    ///
    /// Once recorded, this never changes for the lifetime of the registry.
    pub first_layout: ImageLayout,

    /// The layout that the subresources are in after the last recorded command, if it is
    /// known. `None` means that the command buffer used the subresources without transitioning
    /// them.
    pub current_layout: Option<ImageLayout>,

    /// The aspects the entry was recorded for. Layouts are compared relative to these.
    pub aspects: ImageAspects,

    /// Opaque tag identifying the recording site, carried into mismatch reports.
    pub diagnostic_id: Option<NonZero<u64>>,
}

impl LayoutEntry {
    /// An entry for a first use that does not change the layout.
    #[inline]
    pub fn first_use(layout: ImageLayout, aspects: ImageAspects) -> Self {
        LayoutEntry {
            first_layout: layout,
            current_layout: None,
            aspects,
            diagnostic_id: None,
        }
    }

    /// An entry for a transition into `layout`. The expected layout before the transition is
    /// `expected`, or `layout` itself if it is not given.
    #[inline]
    pub fn transition(
        layout: ImageLayout,
        expected: Option<ImageLayout>,
        aspects: ImageAspects,
    ) -> Self {
        LayoutEntry {
            first_layout: expected.unwrap_or(layout),
            current_layout: Some(layout),
            aspects,
            diagnostic_id: None,
        }
    }

    /// Returns the entry tagged with `diagnostic_id`.
    #[inline]
    pub fn with_diagnostic_id(self, diagnostic_id: Option<NonZero<u64>>) -> Self {
        LayoutEntry {
            diagnostic_id,
            ..self
        }
    }
}

/// The layouts that a single command buffer recorded for a single image.
///
/// A registry holds the image weakly, together with the generation id of the image at the
/// time the registry was created. Once the image is destroyed, or its handle reused for a new
/// image, the registry no longer resolves to an image and its contents are meaningless.
#[derive(Debug)]
pub struct ImageLayoutRegistry {
    image: Weak<Image>,
    image_handle: ash::vk::Image,
    image_id: NonZero<u64>,
    layouts: RangeMap<DeviceSize, LayoutEntry>,
}

impl ImageLayoutRegistry {
    pub(crate) fn new(image: &Arc<Image>) -> Self {
        ImageLayoutRegistry {
            image: Arc::downgrade(image),
            image_handle: image.handle(),
            image_id: image.generation_id(),
            layouts: RangeMap::new(),
        }
    }

    /// Returns the image this registry was recorded for, if it still exists.
    pub fn image(&self) -> Option<Arc<Image>> {
        self.image
            .upgrade()
            .filter(|image| image.generation_id() == self.image_id)
    }

    /// Returns the handle of the image this registry was recorded for.
    #[inline]
    pub fn image_handle(&self) -> ash::vk::Image {
        self.image_handle
    }

    /// Returns the generation id of the image this registry was recorded for.
    #[inline]
    pub fn image_id(&self) -> NonZero<u64> {
        self.image_id
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Returns the recorded entries, ordered by flattened subresource.
    #[inline]
    pub fn layouts(&self) -> &RangeMap<DeviceSize, LayoutEntry> {
        &self.layouts
    }

    /// Applies `entry` to every range in `ranges`.
    ///
    /// Subresources without an entry get a copy of `entry`. Subresources with an entry keep
    /// their first layout; their current layout is overwritten if `entry` has a current layout
    /// that differs from it.
    ///
    /// Returns whether any entry was inserted or changed.
    pub fn update(
        &mut self,
        ranges: impl IntoIterator<Item = Range<DeviceSize>>,
        entry: &LayoutEntry,
    ) -> bool {
        let updater = LayoutEntryUpdater { entry };
        let mut changed = false;

        for range in ranges {
            changed |= self.layouts.infill_update_range(range, &updater);
        }

        changed
    }

    /// Records that the command buffer uses the subresources in `ranges` expecting them to be
    /// in `layout`, without transitioning them. Subresources that already have an entry are
    /// left untouched.
    pub fn track_first_use(
        &mut self,
        ranges: impl IntoIterator<Item = Range<DeviceSize>>,
        layout: ImageLayout,
        aspects: ImageAspects,
    ) {
        self.update(ranges, &LayoutEntry::first_use(layout, aspects));
    }

    /// Records a transition of the subresources in `ranges` into `layout`. For subresources
    /// without an entry, the layout expected before the transition is `expected`, or `layout`
    /// if it is not given.
    pub fn set_current_layout(
        &mut self,
        ranges: impl IntoIterator<Item = Range<DeviceSize>>,
        layout: ImageLayout,
        expected: Option<ImageLayout>,
        aspects: ImageAspects,
    ) {
        self.update(ranges, &LayoutEntry::transition(layout, expected, aspects));
    }

    /// Calls `visitor` with every recorded entry overlapping `ranges`, clipped to the range it
    /// overlaps, until it returns `true`. Returns whether any call returned `true`.
    pub fn any_in_range(
        &self,
        ranges: impl IntoIterator<Item = Range<DeviceSize>>,
        mut visitor: impl FnMut(Range<DeviceSize>, &LayoutEntry) -> bool,
    ) -> bool {
        ranges
            .into_iter()
            .any(|range| self.layouts.any_in_range(&range, &mut visitor))
    }
}

struct LayoutEntryUpdater<'a> {
    entry: &'a LayoutEntry,
}

impl InfillUpdateOps<DeviceSize, LayoutEntry> for LayoutEntryUpdater<'_> {
    #[inline]
    fn infill(&self, _hole: &Range<DeviceSize>) -> Option<LayoutEntry> {
        Some(*self.entry)
    }

    fn update(&self, stored: &mut LayoutEntry) -> bool {
        let Some(layout) = self.entry.current_layout else {
            return false;
        };

        match stored.current_layout {
            Some(current) if layouts_match(stored.aspects, current, layout) => false,
            _ => {
                stored.current_layout = Some(layout);
                true
            }
        }
    }
}

/// Folds the current layouts of a registry into a global map. Subresources whose current layout
/// is unknown are left as they are.
pub(crate) struct GlobalLayoutUpdater;

impl SpliceOps<ImageLayout, LayoutEntry> for GlobalLayoutUpdater {
    #[inline]
    fn insert(&self, src: &LayoutEntry) -> Option<ImageLayout> {
        src.current_layout
    }

    fn update(&self, dst: &mut ImageLayout, src: &LayoutEntry) -> bool {
        match src.current_layout {
            Some(layout) if layout != *dst => {
                *dst = layout;
                true
            }
            _ => false,
        }
    }
}

struct OverwriteUpdater(ImageLayout);

impl InfillUpdateOps<DeviceSize, ImageLayout> for OverwriteUpdater {
    #[inline]
    fn infill(&self, _hole: &Range<DeviceSize>) -> Option<ImageLayout> {
        Some(self.0)
    }

    fn update(&self, stored: &mut ImageLayout) -> bool {
        if *stored != self.0 {
            *stored = self.0;
            true
        } else {
            false
        }
    }
}

/// Sets every subresource in `ranges` of a global map to `layout`.
pub(crate) fn overwrite_layouts(
    layouts: &mut GlobalImageLayoutMap,
    ranges: impl IntoIterator<Item = Range<DeviceSize>>,
    layout: ImageLayout,
) -> bool {
    let updater = OverwriteUpdater(layout);
    let mut changed = false;

    for range in ranges {
        changed |= layouts.infill_update_range(range, &updater);
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageCreateInfo, ImageSubresourceRange};

    const DEPTH_STENCIL: ImageAspects = ImageAspects::DEPTH.union(ImageAspects::STENCIL);

    fn color_image() -> Arc<Image> {
        Image::new(
            ash::vk::Image::null(),
            &ImageCreateInfo {
                mip_levels: 2,
                array_layers: 4,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn entries(registry: &ImageLayoutRegistry) -> Vec<(Range<DeviceSize>, LayoutEntry)> {
        registry.layouts().iter().map(|(r, e)| (r, *e)).collect()
    }

    #[test]
    fn first_use_is_sticky() {
        let image = color_image();
        let mut registry = ImageLayoutRegistry::new(&image);

        registry.track_first_use([0..4], ImageLayout::TransferDstOptimal, ImageAspects::COLOR);
        registry.set_current_layout(
            [2..6],
            ImageLayout::ShaderReadOnlyOptimal,
            Some(ImageLayout::TransferDstOptimal),
            ImageAspects::COLOR,
        );
        registry.track_first_use([0..8], ImageLayout::General, ImageAspects::COLOR);

        assert_eq!(
            entries(&registry),
            [
                (
                    0..2,
                    LayoutEntry::first_use(ImageLayout::TransferDstOptimal, ImageAspects::COLOR),
                ),
                (
                    2..4,
                    LayoutEntry {
                        current_layout: Some(ImageLayout::ShaderReadOnlyOptimal),
                        ..LayoutEntry::first_use(
                            ImageLayout::TransferDstOptimal,
                            ImageAspects::COLOR,
                        )
                    },
                ),
                (
                    4..6,
                    LayoutEntry::transition(
                        ImageLayout::ShaderReadOnlyOptimal,
                        Some(ImageLayout::TransferDstOptimal),
                        ImageAspects::COLOR,
                    ),
                ),
                (
                    6..8,
                    LayoutEntry::first_use(ImageLayout::General, ImageAspects::COLOR),
                ),
            ],
        );
    }

    #[test]
    fn update_is_idempotent() {
        let image = color_image();
        let mut registry = ImageLayoutRegistry::new(&image);
        let entry = LayoutEntry::transition(ImageLayout::General, None, ImageAspects::COLOR);

        assert!(registry.update([0..3, 5..8], &entry));
        assert!(!registry.update([0..3, 5..8], &entry));
        assert!(!registry.update([1..2], &entry));
        assert_eq!(registry.layouts().len(), 2);
    }

    #[test]
    fn equivalent_layouts_do_not_update() {
        let image = Image::new(
            ash::vk::Image::null(),
            &ImageCreateInfo {
                format_aspects: DEPTH_STENCIL,
                ..Default::default()
            },
        )
        .unwrap();
        let mut registry = ImageLayoutRegistry::new(&image);

        registry.set_current_layout(
            [0..1],
            ImageLayout::DepthAttachmentOptimal,
            None,
            ImageAspects::DEPTH,
        );
        let changed = registry.update(
            [0..1],
            &LayoutEntry::transition(
                ImageLayout::DepthStencilAttachmentOptimal,
                None,
                ImageAspects::DEPTH,
            ),
        );
        assert!(!changed);
        assert_eq!(
            registry.layouts().get(&0).unwrap().current_layout,
            Some(ImageLayout::DepthAttachmentOptimal),
        );
    }

    #[test]
    fn unknown_current_layout_never_overwrites() {
        let image = color_image();
        let mut registry = ImageLayoutRegistry::new(&image);

        registry.set_current_layout([0..8], ImageLayout::General, None, ImageAspects::COLOR);
        assert!(!registry.update(
            [0..8],
            &LayoutEntry::first_use(ImageLayout::TransferSrcOptimal, ImageAspects::COLOR),
        ));
        assert_eq!(
            entries(&registry),
            [(0..8, LayoutEntry::transition(ImageLayout::General, None, ImageAspects::COLOR))],
        );
    }

    #[test]
    fn any_in_range() {
        let image = color_image();
        let mut registry = ImageLayoutRegistry::new(&image);
        let ranges = image
            .iter_ranges(&ImageSubresourceRange {
                aspects: ImageAspects::COLOR,
                mip_levels: 0..2,
                array_layers: 1..2,
            })
            .unwrap();
        assert_eq!(ranges.clone().collect::<Vec<_>>(), [1..2, 5..6]);

        registry.track_first_use(ranges.clone(), ImageLayout::General, ImageAspects::COLOR);
        registry.set_current_layout([5..6], ImageLayout::PresentSrc, None, ImageAspects::COLOR);

        let mut visited = Vec::new();
        assert!(!registry.any_in_range([0..8], |range, entry| {
            visited.push((range, entry.current_layout));
            false
        }));
        assert_eq!(
            visited,
            [(1..2, None), (5..6, Some(ImageLayout::PresentSrc))],
        );
        assert!(registry.any_in_range(ranges, |_, entry| entry.current_layout.is_some()));
    }

    #[test]
    fn registry_forgets_destroyed_image() {
        let image = color_image();
        let registry = ImageLayoutRegistry::new(&image);
        assert_eq!(registry.image().as_ref(), Some(&image));

        drop(image);
        assert!(registry.image().is_none());
    }

    #[test]
    fn splice_into_global_map() {
        let image = color_image();
        let mut registry = ImageLayoutRegistry::new(&image);
        registry.track_first_use([0..2], ImageLayout::General, ImageAspects::COLOR);
        registry.set_current_layout(
            [2..6],
            ImageLayout::TransferSrcOptimal,
            None,
            ImageAspects::COLOR,
        );

        let mut global = GlobalImageLayoutMap::new();
        overwrite_layouts(&mut global, [0..4], ImageLayout::General);

        assert!(global.splice(registry.layouts(), &GlobalLayoutUpdater));
        assert_eq!(
            global.iter().map(|(r, &l)| (r, l)).collect::<Vec<_>>(),
            [
                (0..2, ImageLayout::General),
                (2..4, ImageLayout::TransferSrcOptimal),
                (4..6, ImageLayout::TransferSrcOptimal),
            ],
        );
        assert!(!global.splice(registry.layouts(), &GlobalLayoutUpdater));
    }
}
