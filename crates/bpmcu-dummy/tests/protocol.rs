//! Driver behaviour against the simulated MCU

use bpmcu_core::mcu::{create_driver, ChangeCache, DriveType, McuDriver, ProtocolVersion};
use bpmcu_core::{Error, FailureClass};
use bpmcu_dummy::{DummyBus, DummyConfig, DummyConnector, Faults};

const BOTH: [ProtocolVersion; 2] = [ProtocolVersion::V0, ProtocolVersion::V1];

fn driver(connector: &mut DummyConnector) -> McuDriver<DummyBus> {
    create_driver(connector).unwrap()
}

#[test]
fn identifies_both_protocols_through_two_naks() {
    for protocol in BOTH {
        let faults = Faults {
            nak_ident: 2,
            ..Default::default()
        };
        let mut connector = DummyConnector::with_faults(DummyConfig::new(protocol), faults);
        let drv = driver(&mut connector);
        assert_eq!(drv.protocol(), protocol);
        assert_eq!(connector.sim().counters().ident_reads, 3);
    }
}

#[test]
fn three_naks_mean_no_device() {
    let faults = Faults {
        nak_ident: 3,
        ..Default::default()
    };
    let mut connector = DummyConnector::with_faults(DummyConfig::new(ProtocolVersion::V1), faults);
    let err = create_driver(&mut connector).unwrap_err();
    assert!(matches!(err, Error::DeviceAbsent { ident: None, .. }));
    assert!(err.is_device_absent());
}

#[test]
fn missing_functionality_is_not_operational() {
    let faults = Faults {
        missing_functionality: true,
        ..Default::default()
    };
    let mut connector = DummyConnector::with_faults(DummyConfig::new(ProtocolVersion::V0), faults);
    let err = create_driver(&mut connector).unwrap_err();
    assert!(matches!(err, Error::NotOperational { .. }));
    assert_eq!(err.class(), FailureClass::McuAbsent);
    assert_eq!(connector.sim().counters().transactions, 0);
}

#[test]
fn failed_connect_is_not_operational() {
    let faults = Faults {
        connect_fails: true,
        ..Default::default()
    };
    let mut connector = DummyConnector::with_faults(DummyConfig::new(ProtocolVersion::V1), faults);
    assert!(matches!(
        create_driver(&mut connector),
        Err(Error::NotOperational { .. })
    ));
}

#[test]
fn identity_strings() {
    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V0).with_version("0.9.4"));
    let mut drv = driver(&mut connector);
    let info = drv.device_info();
    assert_eq!(info.protocol, ProtocolVersion::V0);
    assert_eq!(info.firmware_version, "0.9.4");
    assert_eq!(info.board_type, "BP-8SFF");
    assert!(info.is_complete());

    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V1));
    let mut drv = driver(&mut connector);
    assert_eq!(drv.firmware_version(), "1.0.0");
    assert_eq!(drv.board_type(), "BP-8NVME");
}

#[test]
fn old_v0_firmware_without_board_type() {
    let faults = Faults {
        no_board_type: true,
        ..Default::default()
    };
    let mut connector = DummyConnector::with_faults(DummyConfig::new(ProtocolVersion::V0), faults);
    let mut drv = driver(&mut connector);
    assert_eq!(drv.board_type(), "");
    assert!(!drv.device_info().is_complete());
}

#[test]
fn drive_types_stay_in_domain() {
    for raw in 0..=u8::MAX {
        let mut connector =
            DummyConnector::new(DummyConfig::new(ProtocolVersion::V0).with_drive(5, raw));
        let mut drv = driver(&mut connector);
        let expected = match raw {
            0 => DriveType::NoDisk,
            1 => DriveType::SataSas,
            2 => DriveType::Nvme,
            _ => DriveType::Unknown,
        };
        assert_eq!(drv.channel_drive_type(5).unwrap(), expected);
    }

    for raw in 0..4u8 {
        let mut connector =
            DummyConnector::new(DummyConfig::new(ProtocolVersion::V1).with_drive(2, raw));
        let mut drv = driver(&mut connector);
        let t = drv.channel_drive_type(2).unwrap();
        assert_eq!(t == DriveType::Unknown, raw == 3);
    }
}

#[test]
fn v0_unstable_presence_is_confirmed() {
    let faults = Faults {
        glitch_presence: 1,
        ..Default::default()
    };
    let config = DummyConfig::new(ProtocolVersion::V0).with_drive(1, 1);
    let mut connector = DummyConnector::with_faults(config, faults);
    let mut drv = driver(&mut connector);
    assert!(drv.channel_present(1).unwrap());
    assert!(!drv.channel_present(0).unwrap());
}

#[test]
fn state_change_detection_is_idempotent() {
    for protocol in BOTH {
        let config = DummyConfig::new(protocol).with_drive(0, 2).with_failure(0);
        let mut connector = DummyConnector::new(config);
        let mut drv = driver(&mut connector);
        let mut cache = ChangeCache::new();

        assert!(drv.has_state_changed(&mut cache).unwrap());
        assert!(!drv.has_state_changed(&mut cache).unwrap());
        assert!(!drv.has_state_changed(&mut cache).unwrap());

        connector.sim_mut().hot_plug(4, Some(1));
        assert!(drv.has_state_changed(&mut cache).unwrap());
        assert!(!drv.has_state_changed(&mut cache).unwrap());
    }
}

#[test]
fn v1_presence_latch_catches_unseen_changes() {
    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V1));
    let mut drv = driver(&mut connector);
    let mut cache = ChangeCache::new();
    assert!(drv.has_state_changed(&mut cache).unwrap());

    // Plugged and pulled between two polls: bitmasks look the same
    connector.sim_mut().hot_plug(6, Some(2));
    connector.sim_mut().hot_plug(6, None);
    assert!(drv.has_state_changed(&mut cache).unwrap());
    assert!(!drv.has_state_changed(&mut cache).unwrap());
}

#[test]
fn v1_locate_write_is_skipped_when_unchanged() {
    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V1));
    let mut drv = driver(&mut connector);

    drv.set_channel_locate_led(3, true).unwrap();
    let writes = connector.sim().counters().bus_writes;
    assert_eq!(connector.sim().config().locate, 0b1000);

    drv.set_channel_locate_led(3, true).unwrap();
    assert_eq!(connector.sim().counters().bus_writes, writes);
    assert!(drv.channel_locate_led(3).unwrap());

    drv.set_channel_locate_led(3, false).unwrap();
    assert_eq!(connector.sim().counters().bus_writes, writes + 1);
    assert!(!drv.channel_locate_led(3).unwrap());
}

#[test]
fn locate_leds_per_protocol() {
    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V0));
    let mut drv = driver(&mut connector);
    drv.set_channel_locate_led(2, true).unwrap();
    drv.set_channel_locate_led(5, true).unwrap();
    assert_eq!(connector.sim().config().locate, 0b0010_0100);
    assert!(matches!(
        drv.channel_locate_led(2),
        Err(Error::Unsupported {
            protocol: ProtocolVersion::V0,
            ..
        })
    ));
    drv.reset_locate_leds().unwrap();
    assert_eq!(connector.sim().config().locate, 0);

    let mut config = DummyConfig::new(ProtocolVersion::V1);
    config.locate = 0xFF;
    let mut connector = DummyConnector::new(config);
    let mut drv = driver(&mut connector);
    drv.reset_locate_leds().unwrap();
    assert_eq!(connector.sim().config().locate, 0);
}

#[test]
fn host_power_signalling() {
    for protocol in BOTH {
        let mut connector = DummyConnector::new(DummyConfig::new(protocol));
        let mut drv = driver(&mut connector);
        drv.set_host_power_state(true).unwrap();
        assert_eq!(connector.sim().host_power(), Some(true));
        drv.set_host_power_state(false).unwrap();
        assert_eq!(connector.sim().host_power(), Some(false));
    }
}

#[test]
fn channel_index_is_checked() {
    for protocol in BOTH {
        let mut connector = DummyConnector::new(DummyConfig::new(protocol));
        let mut drv = driver(&mut connector);
        assert!(matches!(drv.channel_present(8), Err(Error::InvalidChannel(8))));
        assert!(matches!(
            drv.set_channel_locate_led(9, true),
            Err(Error::InvalidChannel(9))
        ));
    }
}

#[test]
fn flash_chunk_round_trip() {
    for protocol in BOTH {
        let mut connector = DummyConnector::new(DummyConfig::new(protocol));
        let mut drv = driver(&mut connector);
        let chunk: Vec<u8> = (0..128u8).collect();

        drv.write_flash_chunk(&chunk).unwrap();
        drv.write_flash_chunk(&chunk[..64]).unwrap();
        assert_eq!(drv.flash_offset(), 192);
        assert_eq!(&connector.sim().flash()[..128], &chunk[..]);
        assert_eq!(&connector.sim().flash()[128..192], &chunk[..64]);

        drv.erase_flash().unwrap();
        assert_eq!(drv.flash_offset(), 0);
        assert!(connector.sim().flash()[..192].iter().all(|&b| b == 0xFF));
    }
}

#[test]
fn corrupted_readback_is_fatal() {
    for protocol in BOTH {
        let faults = Faults {
            corrupt_chunk: Some(1),
            ..Default::default()
        };
        let mut connector = DummyConnector::with_faults(DummyConfig::new(protocol), faults);
        let mut drv = driver(&mut connector);
        let chunk = [0x5Au8; 128];

        drv.write_flash_chunk(&chunk).unwrap();
        let err = drv.write_flash_chunk(&chunk).unwrap_err();
        assert!(matches!(err, Error::VerifyFailed { offset: 128, .. }));
        assert_eq!(err.class(), FailureClass::FlashWriteFailed);
        assert_eq!(drv.flash_offset(), 128);
    }
}

#[test]
fn oversized_chunk_is_rejected() {
    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V1));
    let mut drv = driver(&mut connector);
    let before = connector.sim().counters().transactions;
    assert!(matches!(
        drv.write_flash_chunk(&[0u8; 129]),
        Err(Error::InvalidChunk(129))
    ));
    assert!(matches!(drv.write_flash_chunk(&[]), Err(Error::InvalidChunk(0))));
    assert_eq!(connector.sim().counters().transactions, before);
}

#[test]
fn unaligned_chunk_must_be_the_last() {
    for protocol in BOTH {
        let mut connector = DummyConnector::new(DummyConfig::new(protocol));
        let mut drv = driver(&mut connector);

        drv.write_flash_chunk(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(drv.flash_offset(), 5);

        let before = connector.sim().counters().transactions;
        assert!(matches!(
            drv.write_flash_chunk(&[6, 7, 8, 9]),
            Err(Error::InvalidChunk(4))
        ));
        assert!(matches!(
            drv.write_flash_chunk(&[6]),
            Err(Error::InvalidChunk(1))
        ));
        assert_eq!(drv.flash_offset(), 5);
        assert_eq!(connector.sim().counters().transactions, before);

        drv.erase_flash().unwrap();
        drv.write_flash_chunk(&[6, 7, 8, 9]).unwrap();
        assert_eq!(drv.flash_offset(), 4);
    }
}

#[test]
fn channel_states_read_each_register_once() {
    let config = DummyConfig::new(ProtocolVersion::V1).with_drive(1, 1);
    let mut connector = DummyConnector::new(config);
    let mut drv = driver(&mut connector);
    drv.set_channel_locate_led(1, true).unwrap();
    drv.set_channel_locate_led(6, true).unwrap();

    let before = connector.sim().counters().transactions;
    let states = drv.channel_states().unwrap();
    // presence, failures, drive types, locate mask
    assert_eq!(connector.sim().counters().transactions, before + 4);

    let lit: Vec<usize> = states
        .iter()
        .filter(|s| s.locate == Some(true))
        .map(|s| s.index)
        .collect();
    assert_eq!(lit, vec![1, 6]);
    assert_eq!(drv.locate_mask().unwrap(), 0b0100_0010);
}

#[test]
fn channel_state_cross_checks_presence_and_type() {
    for protocol in BOTH {
        let mut config = DummyConfig::new(protocol)
            .with_drive(0, 2)
            .with_drive(1, 0)
            .with_failure(0);
        // Typed but not present
        config.drive_types[2] = 1;
        let mut connector = DummyConnector::new(config);
        let mut drv = driver(&mut connector);

        let states = drv.channel_states().unwrap();
        assert_eq!(states.len(), 8);

        assert!(states[0].present);
        assert!(states[0].failed);
        assert_eq!(states[0].drive_type, DriveType::Nvme);

        assert!(states[1].present);
        assert_eq!(states[1].drive_type, DriveType::Unknown);

        assert!(!states[2].present);
        assert_eq!(states[2].drive_type, DriveType::NoDisk);

        let locate_readable = protocol == ProtocolVersion::V1;
        assert_eq!(states[0].locate.is_some(), locate_readable);
    }
}

#[test]
fn poll_reports_only_changes_unless_forced() {
    let mut connector = DummyConnector::new(DummyConfig::new(ProtocolVersion::V1).with_drive(0, 1));
    let mut drv = driver(&mut connector);
    let mut cache = ChangeCache::new();

    let first = drv.poll(&mut cache, false).unwrap();
    assert!(first.is_some());
    assert!(drv.poll(&mut cache, false).unwrap().is_none());

    let forced = drv.poll(&mut cache, true).unwrap().unwrap();
    assert_eq!(forced[0].drive_type, DriveType::SataSas);

    connector.sim_mut().hot_plug(0, None);
    let changed = drv.poll(&mut cache, false).unwrap().unwrap();
    assert!(!changed[0].present);
}
