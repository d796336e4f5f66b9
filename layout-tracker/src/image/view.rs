//! Image views.
//!
//! A view selects a subset of the subresources of an image. The selection is normalized and
//! validated once, when the view is created, so the layout tracker can use it directly.

use super::{Image, ImageSubresourceRange, InvalidRange};
use std::sync::Arc;

/// A view of a subset of the subresources of an image.
#[derive(Debug)]
pub struct ImageView {
    image: Arc<Image>,
    subresource_range: ImageSubresourceRange,
}

impl ImageView {
    /// Creates a view of `subresource_range` of `image`.
    pub fn new(
        image: Arc<Image>,
        subresource_range: &ImageSubresourceRange,
    ) -> Result<Arc<ImageView>, InvalidRange> {
        let subresource_range = image.normalize_subresource_range(subresource_range);
        image
            .subresource_encoder()
            .validate_subresource_range(&subresource_range)?;

        Ok(Arc::new(ImageView {
            image,
            subresource_range,
        }))
    }

    /// Creates a view of every subresource of `image`.
    #[inline]
    pub fn new_default(image: Arc<Image>) -> Arc<ImageView> {
        let subresource_range = image.subresource_range();

        Arc::new(ImageView {
            image,
            subresource_range,
        })
    }

    /// Returns the image that this view is a view of.
    #[inline]
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Returns the normalized subresource range that the view selects.
    #[inline]
    pub fn subresource_range(&self) -> &ImageSubresourceRange {
        &self.subresource_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ImageAspects, ImageCreateInfo, SubresourceRangeFactory};

    #[test]
    fn view_selection_is_normalized() {
        let image = Image::new(
            ash::vk::Image::null(),
            &ImageCreateInfo {
                format_aspects: ImageAspects::DEPTH | ImageAspects::STENCIL,
                separate_depth_stencil_layouts: false,
                array_layers: 3,
                ..Default::default()
            },
        )
        .unwrap();
        let view = ImageView::new(
            image.clone(),
            &ImageSubresourceRange {
                aspects: ImageAspects::STENCIL,
                mip_levels: 0..1,
                array_layers: 1..3,
            },
        )
        .unwrap();

        assert_eq!(
            view.subresource_range().aspects,
            ImageAspects::DEPTH | ImageAspects::STENCIL,
        );
        assert_eq!(
            view.subresource_ranges(&image).unwrap().collect::<Vec<_>>(),
            [1..3, 4..6],
        );
    }

    #[test]
    fn invalid_view() {
        let image = Image::new(ash::vk::Image::null(), &ImageCreateInfo::default()).unwrap();
        let result = ImageView::new(
            image.clone(),
            &ImageSubresourceRange {
                aspects: ImageAspects::COLOR,
                mip_levels: 0..2,
                array_layers: 0..1,
            },
        );
        assert!(matches!(
            result,
            Err(InvalidRange::MipLevelsOutOfRange { .. }),
        ));

        let view = ImageView::new_default(image.clone());
        assert_eq!(view.subresource_range(), &image.subresource_range());
    }
}
