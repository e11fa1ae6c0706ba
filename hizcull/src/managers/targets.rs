/// Two interchangeable render target handles for post processing ping-pong.
///
/// Allocating the targets is up to whoever owns them, this only tracks which
/// one is read and which one is written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RenderTargetPair<T> {
    front: T,
    back: T,
}

impl<T: Copy> RenderTargetPair<T> {
    pub fn new(front: T, back: T) -> Self {
        Self { front, back }
    }

    /// Target holding the latest result.
    pub fn current(&self) -> T {
        self.front
    }

    /// Returns `(source, dest)` for the next pass and swaps, so after the pass
    /// `dest` is current.
    pub fn swap_for_post_process(&mut self) -> (T, T) {
        let handles = (self.front, self.back);
        std::mem::swap(&mut self.front, &mut self.back);
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong() {
        let mut pair = RenderTargetPair::new(1, 2);
        assert_eq!(pair.swap_for_post_process(), (1, 2));
        assert_eq!(pair.current(), 2);
        assert_eq!(pair.swap_for_post_process(), (2, 1));
        assert_eq!(pair.current(), 1);
    }
}
