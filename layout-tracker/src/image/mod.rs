//! Images, their subresources, and the flattening of subresources into linear index ranges.
//!
//! Layout state is tracked per *subresource*: one aspect, one mip level and one array layer of
//! an image. To keep the bookkeeping proportional to the number of distinct layout transitions
//! rather than to the size of the image, the subresources of an image are "flattened" to a
//! dense [`DeviceSize`] index space, and the layout maps store ranges of that space.
//!
//! The flattening is hierarchical: aspects at the top level, with the mip levels in that
//! aspect, and the array layers in that mip level. A rectangular [`ImageSubresourceRange`]
//! therefore decodes into one or more contiguous index ranges, which are produced lazily by a
//! [`SubresourceRangeIterator`].
//!
//! # Selecting subresources
//!
//! Recording-side operations accept anything that implements [`SubresourceRangeFactory`]:
//!
//! - an explicit [`ImageSubresourceRange`],
//! - a single-mip [`ImageSubresourceLayers`],
//! - an [`ImageView`], whose normalized selection is computed once when the view is created.
//!
//! All of them are checked with [`Image::validate_subresource_range`] before any range is
//! produced. Callers are expected to report non-compliant selections themselves; the layout
//! tracker only refuses to act on them.

pub(crate) use self::layout_map::{overwrite_layouts, GlobalLayoutUpdater};
pub use self::{
    aspect::*,
    layout::*,
    layout_map::{GlobalImageLayoutMap, ImageLayoutRegistry, LayoutEntry},
    view::ImageView,
};
use crate::{
    macros::impl_id_counter, memory::ExternalMemoryHandleTypes, DeviceSize, NonExhaustive,
    ValidationError, VulkanObject,
};
use parking_lot::{RwLock, RwLockReadGuard};
use smallvec::SmallVec;
use std::{
    iter::FusedIterator,
    num::NonZero,
    ops::Range,
    sync::Arc,
};
use thiserror::Error;

mod aspect;
mod layout;
mod layout_map;
pub mod view;

/// The tracking state of an image: its dimensions, the identity of this particular image
/// object, and the durable map of the layouts its subresources are currently known to be in.
///
/// Command buffers only ever hold weak references to an `Image`, so dropping the last `Arc`
/// destroys the global layout map along with it.
#[derive(Debug)]
pub struct Image {
    handle: ash::vk::Image,
    id: NonZero<u64>,

    format_aspects: ImageAspects,
    mip_levels: u32,
    array_layers: u32,
    external_memory_handle_types: ExternalMemoryHandleTypes,
    separate_depth_stencil_layouts: bool,

    encoder: SubresourceEncoder,
    layouts: RwLock<GlobalImageLayoutMap>,
}

impl Image {
    /// Starts tracking an image.
    ///
    /// `handle` does not need to be unique over time: an image destroyed and recreated with the
    /// same handle gets a new [`generation_id`], which invalidates any state that command
    /// buffers recorded against the old image.
    ///
    /// [`generation_id`]: Self::generation_id
    pub fn new(
        handle: ash::vk::Image,
        create_info: &ImageCreateInfo,
    ) -> Result<Arc<Image>, Box<ValidationError>> {
        create_info.validate()?;

        let &ImageCreateInfo {
            format_aspects,
            mip_levels,
            array_layers,
            external_memory_handle_types,
            separate_depth_stencil_layouts,
            initial_layout,
            _ne: _,
        } = create_info;

        let encoder = SubresourceEncoder::new(format_aspects, mip_levels, array_layers);
        let mut layouts = GlobalImageLayoutMap::new();

        if let Some(initial_layout) = initial_layout {
            overwrite_layouts(&mut layouts, [0..encoder.subresource_count()], initial_layout);
        }

        let image = Image {
            handle,
            id: Self::next_id(),
            format_aspects,
            mip_levels,
            array_layers,
            external_memory_handle_types,
            separate_depth_stencil_layouts,
            encoder,
            layouts: RwLock::new(layouts),
        };

        log::debug!(
            "tracking image {:?} (generation {}, {} subresources)",
            handle,
            image.id,
            image.subresource_count(),
        );

        Ok(Arc::new(image))
    }

    /// Returns the identifier of this image object. Two images with the same handle, one
    /// destroyed before the other was created, have different generation ids.
    #[inline]
    pub fn generation_id(&self) -> NonZero<u64> {
        self.id
    }

    /// Returns the aspects of the image's format.
    #[inline]
    pub fn format_aspects(&self) -> ImageAspects {
        self.format_aspects
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Returns the external memory handle types of the image's memory. Images with any handle
    /// type have externally managed layouts.
    #[inline]
    pub fn external_memory_handle_types(&self) -> ExternalMemoryHandleTypes {
        self.external_memory_handle_types
    }

    /// Returns the number of subresources in the image, which is also the size of its linear
    /// index space.
    #[inline]
    pub fn subresource_count(&self) -> DeviceSize {
        self.encoder.subresource_count()
    }

    #[inline]
    pub fn subresource_encoder(&self) -> &SubresourceEncoder {
        &self.encoder
    }

    /// Returns an `ImageSubresourceRange` covering the whole image.
    pub fn subresource_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.encoder.aspects(),
            mip_levels: 0..self.mip_levels,
            array_layers: 0..self.array_layers,
        }
    }

    /// Expands a selection to the aspects that actually hold separate layouts in this image.
    ///
    /// - On a multi-planar image, the `COLOR` aspect stands for every plane.
    /// - On a combined depth/stencil image without separate depth/stencil layouts, selecting
    ///   either aspect selects both.
    pub fn normalize_subresource_range(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> ImageSubresourceRange {
        const DEPTH_STENCIL: ImageAspects = ImageAspects::DEPTH.union(ImageAspects::STENCIL);

        let mut subresource_range = subresource_range.clone();
        let aspects = &mut subresource_range.aspects;

        if self.format_aspects.intersects(ImageAspects::PLANES)
            && aspects.intersects(ImageAspects::COLOR)
        {
            *aspects = (*aspects - ImageAspects::COLOR)
                | (self.format_aspects & ImageAspects::PLANES);
        }

        if !self.separate_depth_stencil_layouts
            && self.format_aspects.contains(DEPTH_STENCIL)
            && aspects.intersects(DEPTH_STENCIL)
        {
            *aspects |= DEPTH_STENCIL;
        }

        subresource_range
    }

    /// Checks that `subresource_range`, once normalized, selects subresources that exist in this
    /// image.
    pub fn validate_subresource_range(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> Result<(), InvalidRange> {
        self.encoder
            .validate_subresource_range(&self.normalize_subresource_range(subresource_range))
    }

    /// Returns whether `subresource_range` can be handed to the layout tracker.
    #[inline]
    pub fn is_compliant_subresource_range(&self, subresource_range: &ImageSubresourceRange) -> bool {
        self.validate_subresource_range(subresource_range).is_ok()
    }

    /// Returns an iterator over the linear index ranges of a selection.
    pub fn iter_ranges(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> Result<SubresourceRangeIterator, InvalidRange> {
        self.encoder
            .iter_ranges(&self.normalize_subresource_range(subresource_range))
    }

    /// Converts a linear index range back to the subresources it covers, if they form a
    /// rectangular selection.
    #[inline]
    pub fn range_to_subresources(&self, range: Range<DeviceSize>) -> Option<ImageSubresourceRange> {
        self.encoder.range_to_subresources(range)
    }

    /// Returns the layout that `subresource` is known to be in, outside of any command buffer
    /// that has not been committed yet.
    pub fn current_layout(&self, subresource: &Subresource) -> Option<ImageLayout> {
        let index = self.encoder.encode(subresource)?;
        self.layouts.read().get(&index).copied()
    }

    /// Locks the global layout map for reading.
    #[inline]
    pub fn global_layouts(&self) -> RwLockReadGuard<'_, GlobalImageLayoutMap> {
        self.layouts.read()
    }

    #[inline]
    pub(crate) fn layouts(&self) -> &RwLock<GlobalImageLayoutMap> {
        &self.layouts
    }
}

impl_id_counter!(Image);

impl VulkanObject for Image {
    type Handle = ash::vk::Image;

    #[inline]
    fn handle(&self) -> Self::Handle {
        self.handle
    }
}

/// Parameters to start tracking an image.
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    /// The aspects of the image's format.
    ///
    /// For a multi-planar format, these are the planes. `METADATA` and the memory planes are
    /// ignored, as they never hold a layout.
    ///
    /// The default value is [`ImageAspects::COLOR`].
    pub format_aspects: ImageAspects,

    /// The number of mip levels in the image.
    ///
    /// The default value is `1`.
    pub mip_levels: u32,

    /// The number of array layers in the image.
    ///
    /// The default value is `1`.
    pub array_layers: u32,

    /// The external memory handle types of the image's memory.
    ///
    /// The default value is empty.
    pub external_memory_handle_types: ExternalMemoryHandleTypes,

    /// Whether the depth and stencil aspects of a combined depth/stencil image can be in
    /// different layouts. If `false`, every selection of one of them is widened to both.
    ///
    /// The default value is `true`.
    pub separate_depth_stencil_layouts: bool,

    /// The layout that every subresource is in when the image is created, if it is known.
    ///
    /// The default value is `None`, which leaves the global layout map empty.
    pub initial_layout: Option<ImageLayout>,

    pub _ne: NonExhaustive,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            format_aspects: ImageAspects::COLOR,
            mip_levels: 1,
            array_layers: 1,
            external_memory_handle_types: ExternalMemoryHandleTypes::empty(),
            separate_depth_stencil_layouts: true,
            initial_layout: None,
            _ne: NonExhaustive(()),
        }
    }
}

impl ImageCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        let &Self {
            format_aspects,
            mip_levels,
            array_layers,
            ..
        } = self;

        if (format_aspects & ImageAspects::LAYOUT_ASPECTS).is_empty() {
            return Err(Box::new(ValidationError {
                context: "format_aspects".into(),
                problem: "does not contain any aspect that can hold a layout".into(),
                ..Default::default()
            }));
        }

        if format_aspects.intersects(ImageAspects::COLOR)
            && format_aspects.intersects(ImageAspects::DEPTH | ImageAspects::STENCIL)
        {
            return Err(Box::new(ValidationError {
                context: "format_aspects".into(),
                problem: "contains both `ImageAspects::COLOR`, and either `ImageAspects::DEPTH` \
                    or `ImageAspects::STENCIL`"
                    .into(),
                ..Default::default()
            }));
        }

        if mip_levels == 0 {
            return Err(Box::new(ValidationError {
                context: "mip_levels".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkImageCreateInfo-mipLevels-00947"],
            }));
        }

        if array_layers == 0 {
            return Err(Box::new(ValidationError {
                context: "array_layers".into(),
                problem: "is zero".into(),
                vuids: &["VUID-VkImageCreateInfo-arrayLayers-00948"],
            }));
        }

        Ok(())
    }
}

/// A single subresource of an image: the unit that has a layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subresource {
    pub aspect: ImageAspect,
    pub mip_level: u32,
    pub array_layer: u32,
}

/// One or more subresources of an image, spanning a single mip level.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceLayers {
    /// Selects the aspects that will be included.
    ///
    /// The value must not be empty, and must not include `METADATA` or any of the memory
    /// planes.
    pub aspects: ImageAspects,

    /// Selects mip level that will be included.
    pub mip_level: u32,

    /// Selects the range of array layers that will be included.
    ///
    /// The range must not be empty.
    pub array_layers: Range<u32>,
}

impl From<ImageSubresourceLayers> for ImageSubresourceRange {
    #[inline]
    fn from(val: ImageSubresourceLayers) -> Self {
        Self {
            aspects: val.aspects,
            mip_levels: val.mip_level..val.mip_level + 1,
            array_layers: val.array_layers,
        }
    }
}

/// One or more subresources of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    /// Selects the aspects that will be included.
    ///
    /// The value must not be empty, and must not include `METADATA` or any of the memory
    /// planes.
    pub aspects: ImageAspects,

    /// Selects the range of the mip levels that will be included.
    ///
    /// The range must not be empty.
    pub mip_levels: Range<u32>,

    /// Selects the range of array layers that will be included.
    ///
    /// The range must not be empty.
    pub array_layers: Range<u32>,
}

impl From<ImageSubresourceRange> for ash::vk::ImageSubresourceRange {
    #[inline]
    fn from(val: ImageSubresourceRange) -> Self {
        Self {
            aspect_mask: val.aspects.into(),
            base_mip_level: val.mip_levels.start,
            level_count: val.mip_levels.end - val.mip_levels.start,
            base_array_layer: val.array_layers.start,
            layer_count: val.array_layers.end - val.array_layers.start,
        }
    }
}

/// A selection of subresources that is not compliant with the image it is used on.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvalidRange {
    #[error("the selection has no aspects")]
    EmptyAspects,

    #[error("the selection has no mip levels")]
    EmptyMipLevels,

    #[error("the selection has no array layers")]
    EmptyArrayLayers,

    #[error("mip levels {mip_levels:?} are out of range for an image with {image_mip_levels} mip levels")]
    MipLevelsOutOfRange {
        mip_levels: Range<u32>,
        image_mip_levels: u32,
    },

    #[error(
        "array layers {array_layers:?} are out of range for an image with {image_array_layers} \
        array layers"
    )]
    ArrayLayersOutOfRange {
        array_layers: Range<u32>,
        image_array_layers: u32,
    },

    #[error("aspects {aspects:?} are not tracked for an image with aspects {image_aspects:?}")]
    UnsupportedAspects {
        aspects: ImageAspects,
        image_aspects: ImageAspects,
    },
}

/// Something that selects subresources of an image, and can produce the linear index ranges of
/// that selection as many times as needed.
pub trait SubresourceRangeFactory {
    /// Returns a fresh iterator over the index ranges selected in `image`.
    fn subresource_ranges(&self, image: &Image) -> Result<SubresourceRangeIterator, InvalidRange>;
}

impl SubresourceRangeFactory for ImageSubresourceRange {
    #[inline]
    fn subresource_ranges(&self, image: &Image) -> Result<SubresourceRangeIterator, InvalidRange> {
        image.iter_ranges(self)
    }
}

impl SubresourceRangeFactory for ImageSubresourceLayers {
    #[inline]
    fn subresource_ranges(&self, image: &Image) -> Result<SubresourceRangeIterator, InvalidRange> {
        if self.mip_level >= image.mip_levels() {
            return Err(InvalidRange::MipLevelsOutOfRange {
                mip_levels: self.mip_level..self.mip_level.saturating_add(1),
                image_mip_levels: image.mip_levels(),
            });
        }

        image.iter_ranges(&ImageSubresourceRange::from(self.clone()))
    }
}

impl SubresourceRangeFactory for ImageView {
    #[inline]
    fn subresource_ranges(&self, image: &Image) -> Result<SubresourceRangeIterator, InvalidRange> {
        debug_assert_eq!(image, &**self.image());

        // The selection was normalized and validated when the view was created.
        image.subresource_encoder().iter_ranges(self.subresource_range())
    }
}

/// Maps the subresources of an image to a dense linear index space and back.
///
/// Index = aspect number × (mip levels × array layers) + mip level × array layers + array
/// layer, where the aspect number is the position of the aspect among the image's aspects in
/// increasing bit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubresourceEncoder {
    aspect_list: SmallVec<[ImageAspect; 4]>,
    aspects: ImageAspects,
    mip_levels: u32,
    array_layers: u32,
    aspect_size: DeviceSize,
    mip_level_size: DeviceSize,
}

impl SubresourceEncoder {
    /// Creates an encoder for an image with the given format aspects and dimensions.
    pub fn new(format_aspects: ImageAspects, mip_levels: u32, array_layers: u32) -> Self {
        let mut aspects = format_aspects & ImageAspects::LAYOUT_ASPECTS;

        if aspects.intersects(ImageAspects::PLANES) {
            aspects -= ImageAspects::COLOR;
        }

        let mip_level_size = array_layers as DeviceSize;
        let aspect_size = mip_level_size * mip_levels as DeviceSize;

        SubresourceEncoder {
            aspect_list: aspects.into_iter().collect(),
            aspects,
            mip_levels,
            array_layers,
            aspect_size,
            mip_level_size,
        }
    }

    /// Returns the aspects that hold layouts.
    #[inline]
    pub fn aspects(&self) -> ImageAspects {
        self.aspects
    }

    #[inline]
    pub fn subresource_count(&self) -> DeviceSize {
        self.aspect_size * self.aspect_list.len() as DeviceSize
    }

    /// Returns the linear index of `subresource`, or `None` if it is not part of the image.
    pub fn encode(&self, subresource: &Subresource) -> Option<DeviceSize> {
        let &Subresource {
            aspect,
            mip_level,
            array_layer,
        } = subresource;

        if mip_level >= self.mip_levels || array_layer >= self.array_layers {
            return None;
        }

        let aspect_num = self.aspect_list.iter().position(|&a| a == aspect)?;

        Some(
            aspect_num as DeviceSize * self.aspect_size
                + mip_level as DeviceSize * self.mip_level_size
                + array_layer as DeviceSize,
        )
    }

    /// Returns the subresource at linear index `index`.
    ///
    /// # Panics
    ///
    /// - Panics if `index` is not less than [`subresource_count`](Self::subresource_count).
    pub fn decode(&self, index: DeviceSize) -> Subresource {
        assert!(index < self.subresource_count());

        let aspect_num = (index / self.aspect_size) as usize;
        let index = index % self.aspect_size;

        Subresource {
            aspect: self.aspect_list[aspect_num],
            mip_level: (index / self.mip_level_size) as u32,
            array_layer: (index % self.mip_level_size) as u32,
        }
    }

    /// Checks a selection against the image's dimensions and aspects. The selection must
    /// already be normalized.
    pub fn validate_subresource_range(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> Result<(), InvalidRange> {
        let ImageSubresourceRange {
            aspects,
            mip_levels,
            array_layers,
        } = subresource_range;

        if aspects.is_empty() {
            return Err(InvalidRange::EmptyAspects);
        }

        if mip_levels.is_empty() {
            return Err(InvalidRange::EmptyMipLevels);
        }

        if array_layers.is_empty() {
            return Err(InvalidRange::EmptyArrayLayers);
        }

        if mip_levels.end > self.mip_levels {
            return Err(InvalidRange::MipLevelsOutOfRange {
                mip_levels: mip_levels.clone(),
                image_mip_levels: self.mip_levels,
            });
        }

        if array_layers.end > self.array_layers {
            return Err(InvalidRange::ArrayLayersOutOfRange {
                array_layers: array_layers.clone(),
                image_array_layers: self.array_layers,
            });
        }

        if !self.aspects.contains(*aspects) {
            return Err(InvalidRange::UnsupportedAspects {
                aspects: *aspects,
                image_aspects: self.aspects,
            });
        }

        Ok(())
    }

    /// Returns an iterator over the index ranges of a normalized selection.
    pub fn iter_ranges(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> Result<SubresourceRangeIterator, InvalidRange> {
        self.validate_subresource_range(subresource_range)?;

        Ok(SubresourceRangeIterator::new(subresource_range.clone(), self))
    }

    /// Converts a linear index range back to a selection. Returns `None` if the range is empty,
    /// out of bounds, or does not cover a rectangular selection.
    pub fn range_to_subresources(
        &self,
        mut range: Range<DeviceSize>,
    ) -> Option<ImageSubresourceRange> {
        if range.is_empty() || range.end > self.subresource_count() {
            return None;
        }

        if range.end - range.start > self.aspect_size {
            if range.start % self.aspect_size != 0 || range.end % self.aspect_size != 0 {
                return None;
            }

            let start_aspect_num = (range.start / self.aspect_size) as usize;
            let end_aspect_num = (range.end / self.aspect_size) as usize;

            return Some(ImageSubresourceRange {
                aspects: self.aspect_list[start_aspect_num..end_aspect_num]
                    .iter()
                    .copied()
                    .collect(),
                mip_levels: 0..self.mip_levels,
                array_layers: 0..self.array_layers,
            });
        }

        let aspect_num = (range.start / self.aspect_size) as usize;

        if (range.end - 1) / self.aspect_size != aspect_num as DeviceSize {
            return None;
        }

        range.start -= aspect_num as DeviceSize * self.aspect_size;
        range.end -= aspect_num as DeviceSize * self.aspect_size;

        if range.end - range.start > self.mip_level_size {
            if range.start % self.mip_level_size != 0 || range.end % self.mip_level_size != 0 {
                return None;
            }

            return Some(ImageSubresourceRange {
                aspects: self.aspect_list[aspect_num].into(),
                mip_levels: (range.start / self.mip_level_size) as u32
                    ..(range.end / self.mip_level_size) as u32,
                array_layers: 0..self.array_layers,
            });
        }

        let mip_level = (range.start / self.mip_level_size) as u32;

        if (range.end - 1) / self.mip_level_size != mip_level as DeviceSize {
            return None;
        }

        let mip_level_offset = mip_level as DeviceSize * self.mip_level_size;

        Some(ImageSubresourceRange {
            aspects: self.aspect_list[aspect_num].into(),
            mip_levels: mip_level..mip_level + 1,
            array_layers: (range.start - mip_level_offset) as u32
                ..(range.end - mip_level_offset) as u32,
        })
    }
}

/// A lazy, finite sequence of the linear index ranges covering a selection, in increasing index
/// order.
#[derive(Clone)]
pub struct SubresourceRangeIterator {
    next_fn: fn(&mut Self) -> Option<Range<DeviceSize>>,
    aspects: ImageAspects,
    image_aspect_size: DeviceSize,
    image_mip_level_size: DeviceSize,
    mip_levels: Range<u32>,
    array_layers: Range<u32>,

    aspect_nums: smallvec::IntoIter<[usize; 4]>,
    current_aspect_num: Option<usize>,
    current_mip_level: u32,
}

impl SubresourceRangeIterator {
    fn new(subresource_range: ImageSubresourceRange, encoder: &SubresourceEncoder) -> Self {
        debug_assert!(encoder
            .validate_subresource_range(&subresource_range)
            .is_ok());

        let next_fn = if subresource_range.array_layers.start != 0
            || subresource_range.array_layers.end != encoder.array_layers
        {
            Self::next_some_layers
        } else if subresource_range.mip_levels.start != 0
            || subresource_range.mip_levels.end != encoder.mip_levels
        {
            Self::next_some_levels_all_layers
        } else {
            Self::next_all_levels_all_layers
        };

        let mut aspect_nums = subresource_range
            .aspects
            .into_iter()
            .filter_map(|aspect| encoder.aspect_list.iter().position(|&a| a == aspect))
            .collect::<SmallVec<[usize; 4]>>()
            .into_iter();
        let current_aspect_num = aspect_nums.next();
        let current_mip_level = subresource_range.mip_levels.start;

        Self {
            next_fn,
            aspects: subresource_range.aspects,
            image_aspect_size: encoder.aspect_size,
            image_mip_level_size: encoder.mip_level_size,
            mip_levels: subresource_range.mip_levels,
            array_layers: subresource_range.array_layers,

            aspect_nums,
            current_aspect_num,
            current_mip_level,
        }
    }

    /// Returns the aspects of the selection the ranges are generated from.
    #[inline]
    pub fn aspects(&self) -> ImageAspects {
        self.aspects
    }

    /// Used when the requested range contains only a subset of the array layers in the image.
    /// The iterator returns one range for each mip level and aspect, each covering the range of
    /// array layers of that mip level and aspect.
    fn next_some_layers(&mut self) -> Option<Range<DeviceSize>> {
        self.current_aspect_num.map(|aspect_num| {
            let mip_level_offset = aspect_num as DeviceSize * self.image_aspect_size
                + self.current_mip_level as DeviceSize * self.image_mip_level_size;
            self.current_mip_level += 1;

            if self.current_mip_level >= self.mip_levels.end {
                self.current_mip_level = self.mip_levels.start;
                self.current_aspect_num = self.aspect_nums.next();
            }

            let start = mip_level_offset + self.array_layers.start as DeviceSize;
            let end = mip_level_offset + self.array_layers.end as DeviceSize;
            start..end
        })
    }

    /// Used when the requested range contains all array layers in the image, but not all mip
    /// levels. The iterator returns one range for each aspect, each covering all layers of the
    /// range of mip levels of that aspect.
    fn next_some_levels_all_layers(&mut self) -> Option<Range<DeviceSize>> {
        self.current_aspect_num.map(|aspect_num| {
            let aspect_offset = aspect_num as DeviceSize * self.image_aspect_size;
            self.current_aspect_num = self.aspect_nums.next();

            let start =
                aspect_offset + self.mip_levels.start as DeviceSize * self.image_mip_level_size;
            let end = aspect_offset + self.mip_levels.end as DeviceSize * self.image_mip_level_size;
            start..end
        })
    }

    /// Used when the requested range contains all array layers and mip levels in the image.
    /// The iterator returns one range for each series of adjacent aspect numbers, each covering
    /// all mip levels and all layers of those aspects.
    fn next_all_levels_all_layers(&mut self) -> Option<Range<DeviceSize>> {
        self.current_aspect_num.map(|aspect_num_start| {
            self.current_aspect_num = self.aspect_nums.next();
            let mut aspect_num_end = aspect_num_start + 1;

            while self.current_aspect_num == Some(aspect_num_end) {
                self.current_aspect_num = self.aspect_nums.next();
                aspect_num_end += 1;
            }

            let start = aspect_num_start as DeviceSize * self.image_aspect_size;
            let end = aspect_num_end as DeviceSize * self.image_aspect_size;
            start..end
        })
    }
}

impl Iterator for SubresourceRangeIterator {
    type Item = Range<DeviceSize>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        (self.next_fn)(self)
    }
}

impl FusedIterator for SubresourceRangeIterator {}
