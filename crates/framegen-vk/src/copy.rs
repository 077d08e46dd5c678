//! Image copies recorded by the present pipeline, with the layout
//! transitions around them.

use ash::vk;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

/// Layout an image is in before and after the copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyEnd {
    pub image: vk::Image,
    pub initial_layout: vk::ImageLayout,
    /// Layout to leave the image in, `None` keeps the transfer layout.
    pub final_layout: Option<vk::ImageLayout>,
}

fn transition(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
}

/// Record a full-extent copy from `src` to `dst`.
///
/// # Safety
/// `cmd` must be in the recording state and both images must be at least
/// `extent` large.
pub unsafe fn copy_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: CopyEnd,
    dst: CopyEnd,
    extent: vk::Extent2D,
) {
    let before = [
        transition(
            src.image,
            src.initial_layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        ),
        transition(
            dst.image,
            dst.initial_layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        ),
    ];
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &before,
        );
    }

    let region = vk::ImageCopy {
        src_subresource: COLOR_LAYERS,
        src_offset: vk::Offset3D::default(),
        dst_subresource: COLOR_LAYERS,
        dst_offset: vk::Offset3D::default(),
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    };
    unsafe {
        device.cmd_copy_image(
            cmd,
            src.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    let mut after = Vec::with_capacity(2);
    if let Some(layout) = src.final_layout {
        after.push(transition(
            src.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            layout,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::MEMORY_READ,
        ));
    }
    if let Some(layout) = dst.final_layout {
        after.push(transition(
            dst.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            layout,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::MEMORY_READ,
        ));
    }
    if !after.is_empty() {
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &after,
            );
        }
    }
}

/// Capture a presentable image into a history image. The swapchain image is
/// handed back in present layout; the history image stays a transfer target.
///
/// # Safety
/// See [`copy_image`].
pub unsafe fn record_capture(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    swapchain_image: vk::Image,
    history_image: vk::Image,
    extent: vk::Extent2D,
) {
    unsafe {
        copy_image(
            device,
            cmd,
            CopyEnd {
                image: swapchain_image,
                initial_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                final_layout: Some(vk::ImageLayout::PRESENT_SRC_KHR),
            },
            CopyEnd {
                image: history_image,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: None,
            },
            extent,
        );
    }
}

/// Copy a generated frame into an acquired swapchain image and leave it ready
/// to present. The generator writes output images in `GENERAL` layout and
/// gets them back in it.
///
/// # Safety
/// See [`copy_image`].
pub unsafe fn record_emit(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    output_image: vk::Image,
    swapchain_image: vk::Image,
    extent: vk::Extent2D,
) {
    unsafe {
        copy_image(
            device,
            cmd,
            CopyEnd {
                image: output_image,
                initial_layout: vk::ImageLayout::GENERAL,
                final_layout: Some(vk::ImageLayout::GENERAL),
            },
            CopyEnd {
                image: swapchain_image,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: Some(vk::ImageLayout::PRESENT_SRC_KHR),
            },
            extent,
        );
    }
}
