use embassy_sync::{blocking_mutex::raw::RawMutex, mutex::Mutex};

use crate::{
    card::CardInfo,
    clock::Clock,
    engine::{BlockEngine, EngineStats},
    error::BlockError,
    host::SdioHost,
};

/// Operation table a filesystem mounts on top of.
///
/// Implemented by [`BlockEngine`] itself and by a shared `&Mutex` around any
/// device, which is how the monitor task and application tasks reach the
/// same card.
#[allow(async_fn_in_trait)]
pub trait BlockDevice {
    async fn init(&mut self) -> Result<(), BlockError>;

    async fn deinit(&mut self) -> Result<(), BlockError>;

    async fn read_blocks(&mut self, addr: u32, count: u16, dst: &mut [u8])
        -> Result<(), BlockError>;

    async fn write_blocks(&mut self, addr: u32, count: u16, src: &[u8]) -> Result<(), BlockError>;

    async fn erase_blocks(&mut self, addr: u32, count: u16) -> Result<(), BlockError>;

    async fn capacity(&mut self) -> u64;

    /// Geometry of the initialized card, `None` before `init`.
    async fn geometry(&self) -> Option<CardInfo>;

    async fn stats(&self) -> EngineStats {
        EngineStats::default()
    }

    async fn power(&mut self, on: bool) -> Result<(), BlockError> {
        if on {
            self.init().await
        } else {
            self.deinit().await
        }
    }
}

impl<H: SdioHost, C: Clock> BlockDevice for BlockEngine<'_, H, C> {
    async fn init(&mut self) -> Result<(), BlockError> {
        BlockEngine::init(self)
    }

    async fn deinit(&mut self) -> Result<(), BlockError> {
        BlockEngine::deinit(self)
    }

    async fn read_blocks(
        &mut self,
        addr: u32,
        count: u16,
        dst: &mut [u8],
    ) -> Result<(), BlockError> {
        BlockEngine::read_blocks(self, addr, count, dst).await
    }

    async fn write_blocks(&mut self, addr: u32, count: u16, src: &[u8]) -> Result<(), BlockError> {
        BlockEngine::write_blocks(self, addr, count, src).await
    }

    async fn erase_blocks(&mut self, addr: u32, count: u16) -> Result<(), BlockError> {
        BlockEngine::erase_blocks(self, addr, count).await
    }

    async fn capacity(&mut self) -> u64 {
        BlockEngine::capacity(self)
    }

    async fn geometry(&self) -> Option<CardInfo> {
        BlockEngine::geometry(self)
    }

    async fn stats(&self) -> EngineStats {
        BlockEngine::stats(self)
    }

    async fn power(&mut self, on: bool) -> Result<(), BlockError> {
        BlockEngine::set_power(self, on)
    }
}

/// Each call holds the lock for one operation only, so callers interleave
/// at operation boundaries.
impl<M: RawMutex, D: BlockDevice> BlockDevice for &Mutex<M, D> {
    async fn init(&mut self) -> Result<(), BlockError> {
        self.lock().await.init().await
    }

    async fn deinit(&mut self) -> Result<(), BlockError> {
        self.lock().await.deinit().await
    }

    async fn read_blocks(
        &mut self,
        addr: u32,
        count: u16,
        dst: &mut [u8],
    ) -> Result<(), BlockError> {
        self.lock().await.read_blocks(addr, count, dst).await
    }

    async fn write_blocks(&mut self, addr: u32, count: u16, src: &[u8]) -> Result<(), BlockError> {
        self.lock().await.write_blocks(addr, count, src).await
    }

    async fn erase_blocks(&mut self, addr: u32, count: u16) -> Result<(), BlockError> {
        self.lock().await.erase_blocks(addr, count).await
    }

    async fn capacity(&mut self) -> u64 {
        self.lock().await.capacity().await
    }

    async fn geometry(&self) -> Option<CardInfo> {
        self.lock().await.geometry().await
    }

    async fn stats(&self) -> EngineStats {
        self.lock().await.stats().await
    }

    async fn power(&mut self, on: bool) -> Result<(), BlockError> {
        self.lock().await.power(on).await
    }
}

#[cfg(test)]
mod tests;
