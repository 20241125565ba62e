//! Contract tests for on-disk formats and default configuration.

use nvwal::{ControlState, LatencyModel, LogPointer, Lsn, NvmLogConfig, NvmLogManager};
use tempfile::TempDir;

// =============================================================================
// Control File Contract Tests
// =============================================================================

mod control_file_contracts {
    use super::*;

    #[test]
    fn test_control_file_is_36_big_endian_bytes() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("nvm.bin");
        let state = ControlState {
            global_lsn: Lsn::new(42),
            capacity: 100,
            tail: LogPointer::new(7, Lsn::new(41)),
            head: LogPointer::new(2, Lsn::new(36)),
        };
        state.write(&path).expect("write control file");

        let bytes = std::fs::read(&path).expect("read control file");
        assert_eq!(bytes.len(), ControlState::SERIALIZED_SIZE);
        assert_eq!(bytes.len(), 36);

        assert_eq!(&bytes[0..8], &42i64.to_be_bytes());
        assert_eq!(&bytes[8..12], &100i32.to_be_bytes());
        assert_eq!(&bytes[12..16], &7i32.to_be_bytes());
        assert_eq!(&bytes[16..24], &41i64.to_be_bytes());
        assert_eq!(&bytes[24..28], &2i32.to_be_bytes());
        assert_eq!(&bytes[28..36], &36i64.to_be_bytes());
    }

    #[test]
    fn test_persist_writes_control_snapshot() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = NvmLogConfig::new()
            .with_log_dir(temp_dir.path())
            .with_capacity(4)
            .with_latency(LatencyModel::None);
        let manager = NvmLogManager::open(config.clone()).expect("open");

        for tx in 0..3 {
            let lsn = manager.append(nvwal::LogRecord::start(tx)).expect("append");
            manager.flush(lsn);
        }
        manager.persist().expect("persist");

        let state = ControlState::read(&config.control_path())
            .expect("read control")
            .expect("control file exists");
        assert_eq!(state.global_lsn, Lsn::new(3));
        assert_eq!(state.capacity, 4);
        assert_eq!(state.head, LogPointer::new(0, Lsn::ZERO));
        assert_eq!(state.tail, LogPointer::new(3, Lsn::new(3)));
    }

    #[test]
    fn test_truncated_control_file_is_rejected() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = NvmLogConfig::new().with_log_dir(temp_dir.path());
        std::fs::write(config.control_path(), [0u8; 20]).expect("write control");

        assert!(matches!(
            NvmLogManager::open(config),
            Err(nvwal::NvWalError::CorruptedLog(_))
        ));
    }

    #[test]
    fn test_global_lsn_behind_tail_is_rejected() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = NvmLogConfig::new()
            .with_log_dir(temp_dir.path())
            .with_capacity(8);
        let state = ControlState {
            global_lsn: Lsn::new(1),
            capacity: 8,
            tail: LogPointer::new(3, Lsn::new(3)),
            head: LogPointer::new(0, Lsn::ZERO),
        };
        state.write(&config.control_path()).expect("write control");

        assert!(matches!(
            NvmLogManager::open(config),
            Err(nvwal::NvWalError::CorruptedLog(_))
        ));
    }
}

// =============================================================================
// Disk Log Contract Tests
// =============================================================================

mod disk_log_contracts {
    use super::*;
    use nvwal::storage::wal::{LogHeader, LOG_MAGIC, LOG_VERSION};

    #[test]
    fn test_log_magic_and_version() {
        assert_eq!(LOG_MAGIC, b"NVWALLOG");
        assert_eq!(LOG_VERSION, 1);
        assert_eq!(LogHeader::serialized_size(), 29);
    }

    #[test]
    fn test_new_disk_log_starts_with_header() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("nvm.log");
        let writer = nvwal::LogWriter::open(&path, true).expect("open writer");
        assert!(writer.header().enable_checksums);
        drop(writer);

        let bytes = std::fs::read(&path).expect("read disk log");
        assert_eq!(bytes.len(), LogHeader::serialized_size());
        assert_eq!(&bytes[0..8], LOG_MAGIC);
        assert_eq!(&bytes[8..12], &LOG_VERSION.to_le_bytes());
        assert_eq!(bytes[28], 1);
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("nvm.log");
        std::fs::write(&path, [0xABu8; 64]).expect("write garbage");

        assert!(nvwal::LogWriter::open(&path, true).is_err());
        assert!(nvwal::LogReader::open(&path).is_err());
    }
}

// =============================================================================
// Default Configuration Contract Tests
// =============================================================================

mod default_contracts {
    use super::*;
    use nvwal::storage::nvm::{DEFAULT_CONTROL_FILE, DEFAULT_RING_CAPACITY};
    use nvwal::{CheckpointConfig, CheckpointPolicy, PersistSchedule};
    use std::time::Duration;

    #[test]
    fn test_manager_defaults() {
        let config = NvmLogConfig::default();
        assert_eq!(DEFAULT_RING_CAPACITY, 10_000_000);
        assert_eq!(DEFAULT_CONTROL_FILE, "nvm.bin");
        assert_eq!(config.capacity, DEFAULT_RING_CAPACITY);
        assert_eq!(config.latency, LatencyModel::Spin(Duration::from_nanos(400)));
        assert!(config.enable_checksums);
    }

    #[test]
    fn test_task_defaults() {
        let checkpoint = CheckpointConfig::default();
        assert_eq!(checkpoint.policy, CheckpointPolicy::Periodic);
        assert_eq!(checkpoint.period, Duration::from_secs(300));

        let persist = PersistSchedule::default();
        assert_eq!(persist.delay, Duration::from_secs(800));
        assert_eq!(persist.interval, None);
    }
}
