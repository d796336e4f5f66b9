use crate::macros::vulkan_bitflags_enum;

vulkan_bitflags_enum! {
    /// A set of [`ImageAspect`] values.
    ImageAspects
    impl {
        /// The aspects that can hold a layout. Metadata and memory planes are excluded: they are
        /// never part of a subresource.
        pub const LAYOUT_ASPECTS: Self = Self::COLOR
            .union(Self::DEPTH)
            .union(Self::STENCIL)
            .union(Self::PLANE_0)
            .union(Self::PLANE_1)
            .union(Self::PLANE_2);

        /// The format planes of a multi-planar image.
        pub const PLANES: Self = Self::PLANE_0.union(Self::PLANE_1).union(Self::PLANE_2);

        /// Returns whether `self` is exactly the depth aspect, the stencil aspect, or both.
        #[inline]
        pub const fn is_depth_stencil_only(self) -> bool {
            !self.is_empty() && Self::DEPTH.union(Self::STENCIL).contains(self)
        }
    },

    /// An individual data type within an image.
    ///
    /// Most images have only the `Color` aspect, but some may have several.
    ImageAspect,

    = ImageAspectFlags(u32);

    /// The single aspect of a color image.
    COLOR, Color = COLOR,

    /// The depth component of a depth or depth/stencil image.
    DEPTH, Depth = DEPTH,

    /// The stencil component of a stencil or depth/stencil image.
    STENCIL, Stencil = STENCIL,

    /// Metadata of a sparse image. Never holds a layout.
    METADATA, Metadata = METADATA,

    /// The first plane of a multi-planar image.
    PLANE_0, Plane0 = PLANE_0,

    /// The second plane of a multi-planar image.
    PLANE_1, Plane1 = PLANE_1,

    /// The third plane of a multi-planar image.
    PLANE_2, Plane2 = PLANE_2,

    /// A memory plane of a DRM-modifier image. Never holds a layout.
    MEMORY_PLANE_0, MemoryPlane0 = MEMORY_PLANE_0_EXT,

    /// A memory plane of a DRM-modifier image. Never holds a layout.
    MEMORY_PLANE_1, MemoryPlane1 = MEMORY_PLANE_1_EXT,

    /// A memory plane of a DRM-modifier image. Never holds a layout.
    MEMORY_PLANE_2, MemoryPlane2 = MEMORY_PLANE_2_EXT,

    /// A memory plane of a DRM-modifier image. Never holds a layout.
    MEMORY_PLANE_3, MemoryPlane3 = MEMORY_PLANE_3_EXT,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_bit_order() {
        let aspects = ImageAspects::STENCIL | ImageAspects::COLOR | ImageAspects::PLANE_1;
        let list: Vec<_> = aspects.into_iter().collect();
        assert_eq!(
            list,
            [ImageAspect::Color, ImageAspect::Stencil, ImageAspect::Plane1]
        );
        assert_eq!(list.into_iter().collect::<ImageAspects>(), aspects);
    }

    #[test]
    fn depth_stencil_only() {
        assert!(ImageAspects::DEPTH.is_depth_stencil_only());
        assert!(ImageAspects::STENCIL.is_depth_stencil_only());
        assert!((ImageAspects::DEPTH | ImageAspects::STENCIL).is_depth_stencil_only());
        assert!(!ImageAspects::empty().is_depth_stencil_only());
        assert!(!(ImageAspects::DEPTH | ImageAspects::COLOR).is_depth_stencil_only());
    }

    #[test]
    fn debug_lists_flags() {
        let aspects = ImageAspects::DEPTH | ImageAspects::STENCIL;
        assert_eq!(format!("{:?}", aspects), "DEPTH | STENCIL");
        assert_eq!(format!("{:?}", ImageAspects::empty()), "empty()");
    }
}
