/// Where culling kernels run: on the host, as a fallback and as the reference
/// the device results are checked against, or on the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RendererMode {
    CpuPowered,
    GpuPowered,
}

/// State that takes a different shape per [`RendererMode`].
///
/// Contexts, pyramids and executors each carry one of these, and every pair
/// that meets during a frame must agree on the side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModeData<C, G> {
    Cpu(C),
    Gpu(G),
}

impl<C, G> ModeData<C, G> {
    pub fn mode(&self) -> RendererMode {
        match self {
            Self::Cpu(_) => RendererMode::CpuPowered,
            Self::Gpu(_) => RendererMode::GpuPowered,
        }
    }

    pub fn as_cpu(&self) -> Option<&C> {
        match self {
            Self::Cpu(c) => Some(c),
            Self::Gpu(_) => None,
        }
    }

    pub fn as_cpu_mut(&mut self) -> Option<&mut C> {
        match self {
            Self::Cpu(c) => Some(c),
            Self::Gpu(_) => None,
        }
    }

    pub fn as_gpu(&self) -> Option<&G> {
        match self {
            Self::Gpu(g) => Some(g),
            Self::Cpu(_) => None,
        }
    }

    pub fn as_gpu_mut(&mut self) -> Option<&mut G> {
        match self {
            Self::Gpu(g) => Some(g),
            Self::Cpu(_) => None,
        }
    }
}
