use core::cell::Cell;

use embedded_sdmmc::{
    BlockDevice, Mode, RawDirectory, RawFile, RawVolume, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use log::{error, warn};

use super::{LogHandle, LogStorage};
use crate::config::LOG_FILE_NAME;

type Manager<B, Ts> = VolumeManager<B, Ts, 4, 4, 1>;
type SdError<B> = embedded_sdmmc::Error<<B as BlockDevice>::Error>;

/// Time source for boards without a real-time clock.
///
/// Every file gets the FAT epoch as its modification time; rows carry their
/// own relative timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl TimeSource for NoClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 10,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Log file in the root directory of the first FAT volume on an SD card.
///
/// The SD operations are blocking. Volume, directory and file are opened
/// for each operation and closed again when its handle goes away. A volume
/// the card refused to close stays registered with the volume manager, so
/// it is parked and reused by the next operation instead of reopened.
pub struct SdCardStorage<B: BlockDevice, Ts: TimeSource> {
    volume_mgr: Manager<B, Ts>,
    file_name: &'static str,
    parked_volume: Cell<Option<RawVolume>>,
}

impl<B: BlockDevice, Ts: TimeSource> SdCardStorage<B, Ts> {
    pub fn new(block_device: B, ts: Ts) -> Self {
        Self::with_file_name(block_device, ts, LOG_FILE_NAME)
    }

    /// `file_name` must be a valid 8.3 name
    pub fn with_file_name(block_device: B, ts: Ts, file_name: &'static str) -> Self {
        Self {
            volume_mgr: VolumeManager::new(block_device, ts),
            file_name,
            parked_volume: Cell::new(None),
        }
    }

    pub fn file_name(&self) -> &'static str {
        self.file_name
    }

    fn open(&self, mode: Mode) -> Result<SdLogHandle<'_, B, Ts>, SdError<B>> {
        let volume = match self.parked_volume.take() {
            Some(volume) => volume,
            None => self.volume_mgr.open_raw_volume(VolumeIdx(0))?,
        };
        let mut handle = SdLogHandle {
            storage: self,
            volume: Some(volume),
            dir: None,
            file: None,
        };

        // Dropping `handle` on error closes whatever was opened so far
        let dir = self.volume_mgr.open_root_dir(volume)?;
        handle.dir = Some(dir);
        handle.file = Some(self.volume_mgr.open_file_in_dir(dir, self.file_name, mode)?);

        Ok(handle)
    }
}

impl<B: BlockDevice, Ts: TimeSource> LogStorage for SdCardStorage<B, Ts> {
    type Error = SdError<B>;
    type Handle<'a>
        = SdLogHandle<'a, B, Ts>
    where
        Self: 'a;

    fn size(&self) -> Result<u64, Self::Error> {
        let handle = match self.open(Mode::ReadOnly) {
            Ok(handle) => handle,
            Err(embedded_sdmmc::Error::NotFound) => return Ok(0),
            Err(e) => return Err(e),
        };

        let len = match handle.file {
            Some(file) => self.volume_mgr.file_length(file)?,
            None => 0,
        };
        handle.close()?;
        Ok(u64::from(len))
    }

    fn open_append(&self) -> Result<Self::Handle<'_>, Self::Error> {
        self.open(Mode::ReadWriteCreateOrAppend)
    }

    fn open_read(&self) -> Result<Self::Handle<'_>, Self::Error> {
        self.open(Mode::ReadOnly)
    }
}

/// Open log file together with the directory and volume it lives in
pub struct SdLogHandle<'a, B: BlockDevice, Ts: TimeSource> {
    storage: &'a SdCardStorage<B, Ts>,
    volume: Option<RawVolume>,
    dir: Option<RawDirectory>,
    file: Option<RawFile>,
}

impl<B: BlockDevice, Ts: TimeSource> SdLogHandle<'_, B, Ts> {
    /// Close file, directory and volume in that order, stopping at the
    /// first error. Anything left open is closed by `Drop`.
    fn release(&mut self) -> Result<(), SdError<B>> {
        let volume_mgr = &self.storage.volume_mgr;
        // The manager forgets files and directories even when closing fails
        if let Some(file) = self.file.take() {
            volume_mgr.close_file(file)?;
        }
        if let Some(dir) = self.dir.take() {
            volume_mgr.close_dir(dir)?;
        }
        // A volume that fails to close stays open
        if let Some(volume) = self.volume {
            volume_mgr.close_volume(volume)?;
            self.volume = None;
        }
        Ok(())
    }

    fn raw_file(&self) -> Result<RawFile, SdError<B>> {
        self.file.ok_or(embedded_sdmmc::Error::BadHandle)
    }
}

impl<B: BlockDevice, Ts: TimeSource> LogHandle for SdLogHandle<'_, B, Ts> {
    type Error = SdError<B>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.storage.volume_mgr.write(self.raw_file()?, bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.storage.volume_mgr.read(self.raw_file()?, buf)
    }

    fn close(mut self) -> Result<(), Self::Error> {
        self.release()
    }
}

impl<B: BlockDevice, Ts: TimeSource> Drop for SdLogHandle<'_, B, Ts> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("Failed to close SD card log file: {:?}", e);
        }
        if let Some(volume) = self.volume.take() {
            warn!("SD card volume left open, reusing it for the next operation");
            self.storage.parked_volume.set(Some(volume));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AppendLog, HEADER_LINE, LogRecord, Reading, StorageError};
    use embedded_sdmmc::{Block, BlockCount, BlockIdx};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Card slot with no card in it
    struct EmptySlot;

    #[derive(Debug)]
    struct NoMedium;

    impl BlockDevice for EmptySlot {
        type Error = NoMedium;

        fn read(&self, _blocks: &mut [Block], _start: BlockIdx) -> Result<(), Self::Error> {
            Err(NoMedium)
        }

        fn write(&self, _blocks: &[Block], _start: BlockIdx) -> Result<(), Self::Error> {
            Err(NoMedium)
        }

        fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
            Err(NoMedium)
        }
    }

    #[derive(Debug)]
    enum CardError {
        OutOfRange,
        WriteProtected,
    }

    #[derive(Default)]
    struct CardState {
        /// Blocks never written read back as zeros
        blocks: RefCell<HashMap<u32, [u8; Block::LEN]>>,
        num_blocks: u32,
        write_protected: Cell<bool>,
    }

    /// Sparse in-memory SD card; clones share the same blocks.
    #[derive(Clone)]
    struct RamCard(Rc<CardState>);

    const PARTITION_START: u32 = 63;

    impl RamCard {
        fn blank(num_blocks: u32) -> Self {
            RamCard(Rc::new(CardState {
                num_blocks,
                ..CardState::default()
            }))
        }

        /// One FAT16 partition, 1 block per cluster, 8095 clusters.
        fn fat16() -> Self {
            const TOTAL: u32 = 8192;
            const FAT_SIZE: u16 = 32;
            let card = Self::blank(PARTITION_START + TOTAL);
            card.mbr(0x06, TOTAL);

            let mut bpb = [0u8; Block::LEN];
            bpb[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
            bpb[11..13].copy_from_slice(&512u16.to_le_bytes());
            bpb[13] = 1;
            bpb[14..16].copy_from_slice(&1u16.to_le_bytes());
            bpb[16] = 2;
            bpb[17..19].copy_from_slice(&512u16.to_le_bytes());
            bpb[19..21].copy_from_slice(&(TOTAL as u16).to_le_bytes());
            bpb[21] = 0xF8;
            bpb[22..24].copy_from_slice(&FAT_SIZE.to_le_bytes());
            bpb[43..54].copy_from_slice(b"DATALOGGER ");
            bpb[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
            card.put(PARTITION_START, bpb);

            let mut fat = [0u8; Block::LEN];
            fat[0..4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
            card.put(PARTITION_START + 1, fat);
            card.put(PARTITION_START + 1 + u32::from(FAT_SIZE), fat);
            card
        }

        /// One FAT32 partition whose info sector tracks the next free
        /// cluster, so closing the volume always writes to the card.
        fn fat32() -> Self {
            const TOTAL: u32 = 66_658;
            const RESERVED: u16 = 32;
            const FAT_SIZE: u32 = 513;
            let card = Self::blank(PARTITION_START + TOTAL);
            card.mbr(0x0C, TOTAL);

            let mut bpb = [0u8; Block::LEN];
            bpb[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
            bpb[11..13].copy_from_slice(&512u16.to_le_bytes());
            bpb[13] = 1;
            bpb[14..16].copy_from_slice(&RESERVED.to_le_bytes());
            bpb[16] = 2;
            bpb[21] = 0xF8;
            bpb[32..36].copy_from_slice(&TOTAL.to_le_bytes());
            bpb[36..40].copy_from_slice(&FAT_SIZE.to_le_bytes());
            bpb[44..48].copy_from_slice(&2u32.to_le_bytes());
            bpb[48..50].copy_from_slice(&1u16.to_le_bytes());
            bpb[71..82].copy_from_slice(b"DATALOGGER ");
            bpb[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
            card.put(PARTITION_START, bpb);

            let mut info = [0u8; Block::LEN];
            info[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
            info[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
            info[488..492].copy_from_slice(&u32::MAX.to_le_bytes());
            info[492..496].copy_from_slice(&3u32.to_le_bytes());
            info[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
            card.put(PARTITION_START + 1, info);

            // Root directory in cluster 2, a chain of one
            let mut fat = [0u8; Block::LEN];
            fat[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
            fat[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
            fat[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
            let fat_start = PARTITION_START + u32::from(RESERVED);
            card.put(fat_start, fat);
            card.put(fat_start + FAT_SIZE, fat);
            card
        }

        fn mbr(&self, partition_type: u8, num_blocks: u32) {
            let mut mbr = [0u8; Block::LEN];
            mbr[446] = 0x00;
            mbr[450] = partition_type;
            mbr[454..458].copy_from_slice(&PARTITION_START.to_le_bytes());
            mbr[458..462].copy_from_slice(&num_blocks.to_le_bytes());
            mbr[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
            self.put(0, mbr);
        }

        fn put(&self, idx: u32, contents: [u8; Block::LEN]) {
            self.0.blocks.borrow_mut().insert(idx, contents);
        }

        fn write_protect(&self, on: bool) {
            self.0.write_protected.set(on);
        }
    }

    impl BlockDevice for RamCard {
        type Error = CardError;

        fn read(&self, blocks: &mut [Block], start: BlockIdx) -> Result<(), Self::Error> {
            let stored = self.0.blocks.borrow();
            for (i, block) in blocks.iter_mut().enumerate() {
                let idx = start.0 + i as u32;
                if idx >= self.0.num_blocks {
                    return Err(CardError::OutOfRange);
                }
                block.contents = stored.get(&idx).copied().unwrap_or([0; Block::LEN]);
            }
            Ok(())
        }

        fn write(&self, blocks: &[Block], start: BlockIdx) -> Result<(), Self::Error> {
            if self.0.write_protected.get() {
                return Err(CardError::WriteProtected);
            }
            for (i, block) in blocks.iter().enumerate() {
                let idx = start.0 + i as u32;
                if idx >= self.0.num_blocks {
                    return Err(CardError::OutOfRange);
                }
                self.put(idx, block.contents);
            }
            Ok(())
        }

        fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
            Ok(BlockCount(self.0.num_blocks))
        }
    }

    fn record(timestamp_secs: u64) -> LogRecord {
        LogRecord::from_reading(&Reading {
            timestamp_secs,
            humidity_percent: 40.0,
            temperature_celsius: 20.0,
            heat_index_celsius: 19.6,
            adc_raw: 0,
            voltage: 0.0,
        })
        .unwrap()
    }

    fn contents<S: LogStorage>(log: &AppendLog<S>) -> Vec<u8> {
        log.read_all()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .concat()
    }

    #[test]
    fn test_default_file_name() {
        let storage = SdCardStorage::new(EmptySlot, NoClock);
        assert_eq!(storage.file_name(), "DATALOG.CSV");
    }

    #[test]
    fn test_missing_card_is_an_open_failure() {
        let mut log = AppendLog::new(SdCardStorage::new(EmptySlot, NoClock), 2048);

        assert_eq!(log.size(), Err(StorageError::SizeUnavailable));
        assert_eq!(log.append(&record(1)), Err(StorageError::SizeUnavailable));
        assert!(matches!(log.read_all(), Err(StorageError::OpenFailed)));
    }

    #[test]
    fn test_missing_file_has_zero_size() {
        let storage = SdCardStorage::new(RamCard::fat16(), NoClock);
        assert_eq!(storage.size().unwrap(), 0);
        // Nothing was created by asking
        assert_eq!(storage.size().unwrap(), 0);
    }

    #[test]
    fn test_header_is_written_to_a_fresh_card() {
        let mut log = AppendLog::new(SdCardStorage::new(RamCard::fat16(), NoClock), 2048);

        assert_eq!(log.ensure_header(), Ok(true));
        assert_eq!(log.size(), Ok(HEADER_LINE.len() as u64));
        assert_eq!(contents(&log), HEADER_LINE.as_bytes());
    }

    #[test]
    fn test_rows_read_back_in_chunks() {
        let mut log = AppendLog::new(SdCardStorage::new(RamCard::fat16(), NoClock), 16);

        let mut expected = HEADER_LINE.as_bytes().to_vec();
        for t in 1..=3 {
            log.append(&record(t)).unwrap();
            expected.extend_from_slice(record(t).as_bytes());
        }

        let chunks: Vec<Vec<u8>> = log.read_all().unwrap().map(|c| c.unwrap()).collect();
        assert!(chunks.iter().all(|c| c.len() <= 16));
        assert_eq!(chunks.concat(), expected);
        assert_eq!(log.size(), Ok(expected.len() as u64));
    }

    #[test]
    fn test_every_operation_releases_the_card() {
        let mut log = AppendLog::new(SdCardStorage::new(RamCard::fat16(), NoClock), 2048);

        // Volume and handle slots are bounded, so a leak shows up quickly
        let mut size = 0;
        for t in 0..12 {
            log.append(&record(t)).unwrap();
            let now = log.size().unwrap();
            assert!(now > size);
            size = now;
        }
        assert_eq!(contents(&log).len() as u64, size);
    }

    #[test]
    fn test_volume_that_fails_to_close_is_reused() {
        let card = RamCard::fat32();
        let mut log = AppendLog::new(SdCardStorage::new(card.clone(), NoClock), 2048);
        assert_eq!(log.size(), Ok(0));

        // Closing the volume rewrites the info sector, which now fails
        card.write_protect(true);
        assert_eq!(log.size(), Ok(0));

        card.write_protect(false);
        log.append(&record(1)).unwrap();
        let mut expected = HEADER_LINE.as_bytes().to_vec();
        expected.extend_from_slice(record(1).as_bytes());
        assert_eq!(contents(&log), expected);
    }
}
