//! Contract between the presence monitor and a filesystem layer.

use sdio_block::{BlockDevice, BlockError, CardInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountError {
    Device(BlockError),
    NoFilesystem,
    NotMounted,
    AlreadyMounted,
    TableFull,
    /// Device is not initialized, so geometry is unknown.
    NoGeometry,
}

impl MountError {
    pub fn label(self) -> &'static str {
        match self {
            MountError::Device(err) => err.label(),
            MountError::NoFilesystem => "no_filesystem",
            MountError::NotMounted => "not_mounted",
            MountError::AlreadyMounted => "already_mounted",
            MountError::TableFull => "table_full",
            MountError::NoGeometry => "no_geometry",
        }
    }
}

impl From<BlockError> for MountError {
    fn from(err: BlockError) -> Self {
        MountError::Device(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub page_size: u32,
    pub sector_size: u32,
    pub block_count: u32,
}

impl Geometry {
    pub fn from_card(info: CardInfo, sector_size: u32) -> Self {
        Self {
            page_size: info.block_size,
            sector_size,
            block_count: info.block_count,
        }
    }

    pub fn pages_per_sector(&self) -> u32 {
        (self.sector_size / self.page_size.max(1)).max(1)
    }
}

/// What a filesystem gets handed at mount time: where to mount and the
/// block device to mount on.
///
/// The descriptor only lives for one mount or unmount call. A filesystem
/// that keeps doing I/O afterwards holds its own handle to the device, which
/// is cheap when the device is a shared `&Mutex`.
pub struct MountDescriptor<'d, D> {
    pub path: &'static str,
    device: &'d mut D,
    sector_size: u32,
    geometry: Option<Geometry>,
}

impl<'d, D: BlockDevice> MountDescriptor<'d, D> {
    /// Wraps `device`, picking up its geometry if it is already initialized.
    pub async fn open(path: &'static str, device: &'d mut D, sector_size: u32) -> Self {
        let geometry = device
            .geometry()
            .await
            .map(|info| Geometry::from_card(info, sector_size));
        Self {
            path,
            device,
            sector_size,
            geometry,
        }
    }

    /// Brings the device up and fills in geometry.
    pub async fn init(&mut self) -> Result<Geometry, MountError> {
        self.device.init().await?;
        let geometry = self
            .device
            .geometry()
            .await
            .map(|info| Geometry::from_card(info, self.sector_size))
            .ok_or(MountError::NoGeometry)?;
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    /// Another handle to the device, for filesystems that do I/O after
    /// the mount call returns.
    pub fn device_handle(&self) -> D
    where
        D: Copy,
    {
        *self.device
    }

    pub async fn capacity(&mut self) -> u64 {
        self.device.capacity().await
    }

    pub async fn read_page(&mut self, page: u32, buf: &mut [u8]) -> Result<(), BlockError> {
        self.device.read_blocks(page, 1, buf).await
    }

    pub async fn write_page(&mut self, page: u32, buf: &[u8]) -> Result<(), BlockError> {
        self.device.write_blocks(page, 1, buf).await
    }

    pub async fn erase_sector(&mut self, sector: u32) -> Result<(), MountError> {
        let geometry = self.geometry.ok_or(MountError::NoGeometry)?;
        let pages = geometry.pages_per_sector();
        let first = sector
            .checked_mul(pages)
            .ok_or(MountError::Device(BlockError::InvalidParameter))?;
        let count = u16::try_from(pages).map_err(|_| BlockError::InvalidParameter)?;
        self.device.erase_blocks(first, count).await?;
        Ok(())
    }

    pub async fn power(&mut self, on: bool) -> Result<(), BlockError> {
        let result = self.device.power(on).await;
        if !on {
            self.geometry = None;
        }
        result
    }
}

/// Filesystem layer the monitor mounts and unmounts.
#[allow(async_fn_in_trait)]
pub trait FsMount {
    async fn mount<D: BlockDevice>(
        &mut self,
        descriptor: &mut MountDescriptor<'_, D>,
    ) -> Result<(), MountError>;

    async fn unmount<D: BlockDevice>(
        &mut self,
        descriptor: &mut MountDescriptor<'_, D>,
        force: bool,
    ) -> Result<(), MountError>;
}
