//! Minimal mount layer: identifies the volume on the card and keeps a table
//! of mounted paths. File access is left to a real filesystem.

use heapless::{String, Vec};
use sdio_block::{BlockDevice, BLOCK_SIZE};

use crate::{
    config::{VOLUME_LABEL_MAX, VOLUME_TABLE_MAX},
    mount::{FsMount, MountDescriptor, MountError},
};


const MBR_PARTITION_TABLE: usize = 446;
const MBR_PARTITION_ENTRY: usize = 16;
const PARTITION_TYPE_GPT_PROTECTIVE: u8 = 0xEE;
const GPT_ENTRIES_LBA: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filesystem {
    ExFat,
    Fat32,
    Fat16,
    Fat12,
    Ntfs,
}

impl Filesystem {
    pub fn label(self) -> &'static str {
        match self {
            Filesystem::ExFat => "exfat",
            Filesystem::Fat32 => "fat32",
            Filesystem::Fat16 => "fat16",
            Filesystem::Fat12 => "fat12",
            Filesystem::Ntfs => "ntfs",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountedVolume {
    pub path: &'static str,
    pub filesystem: Filesystem,
    /// Block holding the volume boot record.
    pub first_block: u32,
    pub capacity_bytes: u64,
    pub label: String<VOLUME_LABEL_MAX>,
}

#[repr(C, align(4))]
struct SectorBuf([u8; BLOCK_SIZE]);

#[derive(Default)]
pub struct VolumeProbe {
    volumes: Vec<MountedVolume, VOLUME_TABLE_MAX>,
}

impl VolumeProbe {
    pub const fn new() -> Self {
        Self { volumes: Vec::new() }
    }

    pub fn volumes(&self) -> &[MountedVolume] {
        &self.volumes
    }

    pub fn volume(&self, path: &str) -> Option<&MountedVolume> {
        self.volumes.iter().find(|volume| volume.path == path)
    }

    async fn probe<D: BlockDevice>(
        descriptor: &mut MountDescriptor<'_, D>,
    ) -> Result<MountedVolume, MountError> {
        let mut sector = SectorBuf([0; BLOCK_SIZE]);
        descriptor.read_page(0, &mut sector.0).await?;

        let mut first_block = 0;
        let filesystem = match detect_vbr_filesystem(&sector.0) {
            Some(fs) => fs,
            None => {
                first_block = first_partition_lba(&mut sector, descriptor).await?;
                descriptor.read_page(first_block, &mut sector.0).await?;
                detect_vbr_filesystem(&sector.0).ok_or(MountError::NoFilesystem)?
            }
        };

        Ok(MountedVolume {
            path: descriptor.path,
            filesystem,
            first_block,
            capacity_bytes: descriptor.capacity().await,
            label: volume_label(&sector.0, filesystem),
        })
    }
}

impl FsMount for VolumeProbe {
    async fn mount<D: BlockDevice>(
        &mut self,
        descriptor: &mut MountDescriptor<'_, D>,
    ) -> Result<(), MountError> {
        if self.volume(descriptor.path).is_some() {
            return Err(MountError::AlreadyMounted);
        }
        // A full table is refused before the card is touched.
        if self.volumes.is_full() {
            log::warn!(
                "volume: table_full path={} max={}",
                descriptor.path,
                VOLUME_TABLE_MAX
            );
            return Err(MountError::TableFull);
        }
        descriptor.init().await?;

        let volume = match Self::probe(descriptor).await {
            Ok(volume) => volume,
            Err(err) => {
                log::warn!(
                    "volume: probe_failed path={} err={}",
                    descriptor.path,
                    err.label()
                );
                power_off(descriptor).await;
                return Err(err);
            }
        };

        log::info!(
            "volume: mounted path={} fs={} first_block={} capacity_mb={} label={}",
            volume.path,
            volume.filesystem.label(),
            volume.first_block,
            volume.capacity_bytes / (1024 * 1024),
            volume.label.as_str()
        );
        if let Err(volume) = self.volumes.push(volume) {
            log::warn!("volume: table_full path={}", volume.path);
            power_off(descriptor).await;
            return Err(MountError::TableFull);
        }
        Ok(())
    }

    async fn unmount<D: BlockDevice>(
        &mut self,
        descriptor: &mut MountDescriptor<'_, D>,
        force: bool,
    ) -> Result<(), MountError> {
        let index = self
            .volumes
            .iter()
            .position(|volume| volume.path == descriptor.path)
            .ok_or(MountError::NotMounted)?;
        let volume = self.volumes.swap_remove(index);
        log::info!(
            "volume: unmounted path={} fs={} force={}",
            volume.path,
            volume.filesystem.label(),
            force as u8
        );
        Ok(())
    }
}

async fn power_off<D: BlockDevice>(descriptor: &mut MountDescriptor<'_, D>) {
    if let Err(err) = descriptor.power(false).await {
        log::warn!("volume: power_off_failed err={}", err.label());
    }
}

fn detect_vbr_filesystem(sector: &[u8; BLOCK_SIZE]) -> Option<Filesystem> {
    if &sector[3..11] == b"EXFAT   " {
        return Some(Filesystem::ExFat);
    }
    if &sector[3..11] == b"NTFS    " {
        return Some(Filesystem::Ntfs);
    }
    if &sector[82..90] == b"FAT32   " {
        return Some(Filesystem::Fat32);
    }
    if &sector[54..62] == b"FAT16   " {
        return Some(Filesystem::Fat16);
    }
    if &sector[54..62] == b"FAT12   " {
        return Some(Filesystem::Fat12);
    }
    None
}

fn has_boot_signature(sector: &[u8; BLOCK_SIZE]) -> bool {
    sector[510] == 0x55 && sector[511] == 0xAA
}

/// Start of the first used MBR entry, following a protective MBR into GPT.
async fn first_partition_lba<D: BlockDevice>(
    sector: &mut SectorBuf,
    descriptor: &mut MountDescriptor<'_, D>,
) -> Result<u32, MountError> {
    if !has_boot_signature(&sector.0) {
        return Err(MountError::NoFilesystem);
    }

    let entry = (0..4)
        .map(|idx| MBR_PARTITION_TABLE + idx * MBR_PARTITION_ENTRY)
        .map(|off| (sector.0[off + 4], le_u32(&sector.0[off + 8..off + 12])))
        .find(|&(kind, start)| kind != 0 && start != 0);
    let Some((kind, start)) = entry else {
        return Err(MountError::NoFilesystem);
    };
    if kind != PARTITION_TYPE_GPT_PROTECTIVE {
        return Ok(start);
    }

    descriptor.read_page(GPT_ENTRIES_LBA, &mut sector.0).await?;
    let first_lba = u64::from_le_bytes([
        sector.0[32],
        sector.0[33],
        sector.0[34],
        sector.0[35],
        sector.0[36],
        sector.0[37],
        sector.0[38],
        sector.0[39],
    ]);
    match u32::try_from(first_lba) {
        Ok(lba) if lba != 0 => Ok(lba),
        _ => Err(MountError::NoFilesystem),
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn volume_label(sector: &[u8; BLOCK_SIZE], filesystem: Filesystem) -> String<VOLUME_LABEL_MAX> {
    let raw = match filesystem {
        Filesystem::Fat32 => &sector[71..82],
        Filesystem::Fat16 | Filesystem::Fat12 => &sector[43..54],
        Filesystem::ExFat | Filesystem::Ntfs => return String::new(),
    };
    let mut label = String::new();
    for &byte in raw {
        if byte.is_ascii_graphic() || byte == b' ' {
            let _ = label.push(byte as char);
        }
    }
    while label.ends_with(' ') {
        label.pop();
    }
    if label.as_str() == "NO NAME" {
        label.clear();
    }
    label
}
