//! Properties of the memory backing a tracked image.

use crate::macros::vulkan_bitflags;

vulkan_bitflags! {
    /// A set of external memory handle types that an image can be exported to or imported from.
    ///
    /// The layout of an image whose memory is shared with another API or process is managed
    /// outside of the recorded command buffers, so such images are never layout-validated.
    ExternalMemoryHandleTypes = ExternalMemoryHandleTypeFlags(u32);

    /// A POSIX file descriptor handle.
    OPAQUE_FD = OPAQUE_FD,

    /// A Windows NT handle.
    OPAQUE_WIN32 = OPAQUE_WIN32,

    /// A Windows global share handle.
    OPAQUE_WIN32_KMT = OPAQUE_WIN32_KMT,

    /// A Windows NT handle to a Direct3D 10 or 11 texture.
    D3D11_TEXTURE = D3D11_TEXTURE,

    /// A Windows global share handle to a Direct3D 10 or 11 texture.
    D3D11_TEXTURE_KMT = D3D11_TEXTURE_KMT,

    /// A Windows NT handle to a Direct3D 12 heap.
    D3D12_HEAP = D3D12_HEAP,

    /// A Windows NT handle to a Direct3D 12 committed resource.
    D3D12_RESOURCE = D3D12_RESOURCE,

    /// A POSIX file descriptor handle to a Linux dma_buf.
    DMA_BUF = DMA_BUF_EXT,

    /// An Android hardware buffer.
    ANDROID_HARDWARE_BUFFER = ANDROID_HARDWARE_BUFFER_ANDROID,

    /// A host pointer returned by a host memory allocation command.
    HOST_ALLOCATION = HOST_ALLOCATION_EXT,

    /// A host pointer to host mapped foreign memory.
    HOST_MAPPED_FOREIGN_MEMORY = HOST_MAPPED_FOREIGN_MEMORY_EXT,
}
