use std::time::{Duration, UNIX_EPOCH};

use q35_smbios::{
    build_table, firmware_date, firmware_timestamp, parse_entry_point, parse_structures,
    smbios_args, validate_eps_checksum, SmbiosInputs, EPS_LENGTH,
};

fn inputs_for(path: &std::path::Path) -> SmbiosInputs {
    SmbiosInputs {
        firmware_timestamp: firmware_timestamp(path).expect("stat firmware image"),
        repo_version: "2025.01".to_string(),
        emulator_version: vec!["9".into(), "1".into(), "0".into()],
        boot_selection: ",version=Vol+".to_string(),
    }
}

#[test]
fn table_from_firmware_file_is_well_formed() {
    let tmp = tempfile::tempdir().unwrap();
    let code = tmp.path().join("QEMUQ35_CODE.fd");
    std::fs::write(&code, [0xffu8; 4096]).unwrap();

    let inputs = inputs_for(&code);
    let blob = build_table(&inputs).unwrap();

    assert!(validate_eps_checksum(&blob));
    let eps = parse_entry_point(&blob).expect("invalid SMBIOS entry point");
    let table = &blob[EPS_LENGTH..];
    assert_eq!(eps.table_max_size as usize, table.len());

    let structures = parse_structures(table);
    let types: Vec<u8> = structures.iter().map(|s| s.header.ty).collect();
    assert_eq!(types, [0, 1, 3, 127]);

    let handles: Vec<u16> = structures.iter().map(|s| s.header.handle).collect();
    assert_eq!(handles, [0, 1, 2, 3]);

    let bios = &structures[0];
    let date = firmware_date(inputs.firmware_timestamp).unwrap();
    assert_eq!(bios.string(bios.formatted[4]), Some("Patina"));
    assert_eq!(bios.string(bios.formatted[5]), Some("patina-q35-2025.01"));
    assert_eq!(bios.string(bios.formatted[8]), Some(date.as_str()));

    let enclosure = &structures[2];
    assert_eq!(enclosure.string(enclosure.formatted[6]), Some("Vol+"));
    assert_eq!(enclosure.string(enclosure.formatted[7]), Some("40-41-42-45"));
}

#[test]
fn inline_args_use_the_same_release_date() {
    let tmp = tempfile::tempdir().unwrap();
    let code = tmp.path().join("QEMUQ35_CODE.fd");
    std::fs::write(&code, b"fd").unwrap();

    let inputs = inputs_for(&code);
    let date = firmware_date(inputs.firmware_timestamp).unwrap();
    let args = smbios_args(&inputs).unwrap();
    assert!(args[1].contains(&format!("date={date}")), "{}", args[1]);
}

#[test]
fn changing_any_input_changes_the_blob() {
    let base = SmbiosInputs {
        firmware_timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        repo_version: "1.0".to_string(),
        emulator_version: vec!["8".into(), "0".into()],
        boot_selection: String::new(),
    };
    let reference = build_table(&base).unwrap();

    let variants = [
        SmbiosInputs {
            firmware_timestamp: UNIX_EPOCH + Duration::from_secs(1_800_000_000),
            ..base.clone()
        },
        SmbiosInputs {
            repo_version: "1.1".to_string(),
            ..base.clone()
        },
        SmbiosInputs {
            emulator_version: vec!["7".into(), "2".into()],
            ..base.clone()
        },
        SmbiosInputs {
            boot_selection: ",version=Vol-".to_string(),
            ..base.clone()
        },
    ];
    for variant in &variants {
        let blob = build_table(variant).unwrap();
        assert_ne!(blob, reference, "{variant:?}");
        assert!(validate_eps_checksum(&blob));
    }
}
