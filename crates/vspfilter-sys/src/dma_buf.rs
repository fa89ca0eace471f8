// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! `linux/dma-buf.h` CPU access synchronisation.

pub const DMA_BUF_SYNC_READ: u64 = 1 << 0;
pub const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
pub const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
pub const DMA_BUF_SYNC_START: u64 = 0 << 2;
pub const DMA_BUF_SYNC_END: u64 = 1 << 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dma_buf_sync {
    pub flags: u64,
}

nix::ioctl_write_ptr!(dma_buf_ioctl_sync, b'b', 0, dma_buf_sync);
