use std::{
    future::Future,
    mem,
    pin::pin,
    task::{Context, Poll},
};

use wgpu::Device;

/// Catches buffer, texture and pipeline creation failures as a `Result`
/// instead of an uncaptured device error.
#[must_use = "All error scopes must end in a call to `end`"]
pub struct AllocationErrorScope<'a> {
    device: &'a Device,
}

impl<'a> AllocationErrorScope<'a> {
    pub fn new(device: &'a Device) -> Self {
        // Validation catches sizes over the device limits, out of memory catches the rest.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        Self { device }
    }

    pub fn end(self) -> Result<(), wgpu::Error> {
        let device = self.device;
        mem::forget(self);

        let out_of_memory = poll_scope(device);
        let validation = poll_scope(device);
        out_of_memory.and(validation)
    }
}

fn poll_scope(device: &Device) -> Result<(), wgpu::Error> {
    let future = pin!(device.pop_error_scope());
    match future.poll(&mut Context::from_waker(&noop_waker::noop_waker())) {
        Poll::Ready(Some(error)) => Err(error),
        // Native backends resolve immediately, anything else is taken as success.
        Poll::Ready(None) | Poll::Pending => Ok(()),
    }
}

impl Drop for AllocationErrorScope<'_> {
    fn drop(&mut self) {
        log::error!("AllocationErrorScope dropped without calling `end`, device error scopes are now unbalanced");
    }
}
