//! Partition table reading.

use std::path::Path;

use disktree_common::{DisktreeError, DisktreeResult, Invocation};
use serde::{Deserialize, Serialize};

use super::lvm::LvmDetails;
use crate::filesystem::Probe;
use crate::host::Host;

/// GPT partition type of an LVM physical volume.
pub const LVM_GPT_TYPE: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
/// MBR partition type of an LVM physical volume.
pub const LVM_MBR_TYPE: &str = "8e";

const DEFAULT_SECTOR_SIZE: u64 = 512;

#[derive(Debug, Deserialize)]
struct SfdiskOutput {
    partitiontable: SfdiskTable,
}

#[derive(Debug, Deserialize)]
struct SfdiskTable {
    label: String,
    id: Option<String>,
    unit: String,
    sectorsize: Option<u64>,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Deserialize)]
struct SfdiskPartition {
    start: u64,
    size: u64,
    #[serde(rename = "type")]
    type_id: String,
    uuid: Option<String>,
    #[serde(default)]
    bootable: bool,
}

/// One partition, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Partition UUID, native or synthesized.
    pub partuuid: String,
    /// Offset from the start of the disk.
    pub start: u64,
    /// Length.
    pub size: u64,
    /// Partition type identifier.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Boot flag.
    pub bootable: bool,
    /// Filesystem UUID, once probed.
    pub uuid: Option<String>,
    /// Filesystem type, once probed.
    pub fstype: Option<String>,
    /// Filesystem label, once probed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Volume group and logical volumes when this is a physical volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lvm: Option<LvmDetails>,
}

impl Partition {
    /// Whether the type identifier marks an LVM physical volume.
    #[must_use]
    pub fn is_lvm(&self) -> bool {
        self.type_id.eq_ignore_ascii_case(LVM_GPT_TYPE)
            || self.type_id.eq_ignore_ascii_case(LVM_MBR_TYPE)
    }

    /// Record what probing the opened partition found.
    pub fn set_probe(&mut self, probe: &Probe) {
        self.uuid.clone_from(&probe.uuid);
        self.fstype.clone_from(&probe.fstype);
        self.label.clone_from(&probe.label);
    }
}

/// A parsed partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    /// Table format (`gpt`, `dos`).
    pub label: String,
    /// Disk identifier.
    pub id: Option<String>,
    /// Bytes per sector.
    pub sector_size: u64,
    /// Partitions sorted by partition UUID.
    pub partitions: Vec<Partition>,
}

/// Derive a partition UUID for an MBR partition the way `blkid` does.
///
/// `index` is zero-based; the suffix uses the one-based partition number.
#[must_use]
pub fn synthesize_dos_partuuid(table_id: &str, index: usize) -> String {
    let id = table_id.trim();
    let id = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id)
        .to_lowercase();
    format!("{id:0>8.33}-{:02x}", index + 1)
}

impl PartitionTable {
    /// Parse `sfdisk --json` output.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the unit is not sectors.
    pub fn parse(json: &str) -> DisktreeResult<Self> {
        let output: SfdiskOutput =
            serde_json::from_str(json).map_err(|e| DisktreeError::MalformedOutput {
                what: "sfdisk",
                message: e.to_string(),
            })?;
        let table = output.partitiontable;

        if table.unit != "sectors" {
            return Err(DisktreeError::UnsupportedPartitionUnit { unit: table.unit });
        }

        let sector_size = table.sectorsize.unwrap_or(DEFAULT_SECTOR_SIZE);
        let is_dos = table.label == "dos";
        let mut partitions = table
            .partitions
            .into_iter()
            .enumerate()
            .map(|(index, p)| {
                let partuuid = match (p.uuid, &table.id) {
                    (Some(uuid), _) => uuid,
                    (None, Some(id)) if is_dos => synthesize_dos_partuuid(id, index),
                    (None, _) => {
                        return Err(DisktreeError::MalformedOutput {
                            what: "sfdisk",
                            message: format!("partition {} has no UUID", index + 1),
                        });
                    }
                };
                let bytes = |sectors: u64, field: &str| {
                    sectors
                        .checked_mul(sector_size)
                        .ok_or_else(|| DisktreeError::MalformedOutput {
                            what: "sfdisk",
                            message: format!(
                                "partition {} {field} of {sectors} sectors overflows",
                                index + 1
                            ),
                        })
                };
                Ok(Partition {
                    start: bytes(p.start, "start")?,
                    size: bytes(p.size, "size")?,
                    partuuid,
                    type_id: p.type_id,
                    bootable: p.bootable,
                    uuid: None,
                    fstype: None,
                    label: None,
                    lvm: None,
                })
            })
            .collect::<DisktreeResult<Vec<_>>>()?;

        partitions.sort_by(|a, b| a.partuuid.cmp(&b.partuuid));

        Ok(Self {
            label: table.label,
            id: table.id,
            sector_size,
            partitions,
        })
    }

    /// Report elements describing this table.
    ///
    /// # Errors
    ///
    /// Returns an error if the partitions cannot be serialized.
    pub fn report_elements(&self) -> DisktreeResult<Vec<(&'static str, serde_json::Value)>> {
        Ok(vec![
            ("partition-table", serde_json::Value::from(self.label.clone())),
            (
                "partition-table-id",
                self.id
                    .clone()
                    .map_or(serde_json::Value::Null, serde_json::Value::from),
            ),
            ("partitions", serde_json::to_value(&self.partitions)?),
        ])
    }
}

/// Read the partition table of `device`.
///
/// Returns `None` when the device carries no partition table.
///
/// # Errors
///
/// Returns an error if `sfdisk` cannot be run, its output is malformed, or
/// the table uses a unit other than sectors.
pub fn read(host: &dyn Host, device: &Path) -> DisktreeResult<Option<PartitionTable>> {
    let invocation = Invocation::new("sfdisk").arg("--json").arg(device);
    let output = host.run(&invocation)?;
    if !output.success() {
        tracing::info!(device = %device.display(), "No partition table");
        return Ok(None);
    }

    let table = PartitionTable::parse(&output.stdout)?;
    tracing::debug!(
        device = %device.display(),
        label = %table.label,
        partitions = table.partitions.len(),
        "Read partition table"
    );
    Ok(Some(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;
    use disktree_common::ToolOutput;
    use proptest::prelude::*;

    const GPT: &str = r#"{
        "partitiontable": {
            "label": "gpt",
            "id": "D209C89E-EA5E-4FBD-B161-B461CCE297E0",
            "device": "/dev/loop0",
            "unit": "sectors",
            "firstlba": 34,
            "lastlba": 20971486,
            "sectorsize": 512,
            "partitions": [
                {"node": "/dev/loop0p2", "start": 4096, "size": 1228800, "type": "C12A7328-F81F-11D2-BA4B-00A0C93EC93B", "uuid": "68B2905B-DF3E-4FB3-80FA-49D1E773AA33"},
                {"node": "/dev/loop0p1", "start": 2048, "size": 2048, "type": "21686148-6449-6E6F-744E-656564454649", "uuid": "FAC7F1FB-3E8D-4137-A512-961DE09A5549"},
                {"node": "/dev/loop0p3", "start": 1232896, "size": 19738590, "type": "E6D6D379-F507-44C2-A23C-238F2A3DF928", "uuid": "6264D520-3FB9-423F-8AB8-7A0A8E3D3562"}
            ]
        }
    }"#;

    const DOS: &str = r#"{
        "partitiontable": {
            "label": "dos",
            "id": "0xabcd1234",
            "device": "/dev/loop0",
            "unit": "sectors",
            "partitions": [
                {"node": "/dev/loop0p1", "start": 2048, "size": 2048, "type": "83", "bootable": true},
                {"node": "/dev/loop0p2", "start": 4096, "size": 8192, "type": "8e"}
            ]
        }
    }"#;

    #[test]
    fn gpt_partitions_sorted_by_uuid() {
        let table = PartitionTable::parse(GPT).unwrap();
        let uuids: Vec<&str> = table.partitions.iter().map(|p| p.partuuid.as_str()).collect();
        assert_eq!(
            uuids,
            vec![
                "6264D520-3FB9-423F-8AB8-7A0A8E3D3562",
                "68B2905B-DF3E-4FB3-80FA-49D1E773AA33",
                "FAC7F1FB-3E8D-4137-A512-961DE09A5549",
            ]
        );
        assert!(table.partitions[0].is_lvm());
        assert_eq!(table.partitions[2].start, 2048 * 512);
    }

    #[test]
    fn dos_uuid_from_table_id() {
        let table = PartitionTable::parse(DOS).unwrap();
        assert_eq!(table.sector_size, 512);
        assert_eq!(table.partitions[0].partuuid, "abcd1234-01");
        assert_eq!(table.partitions[1].partuuid, "abcd1234-02");
        assert!(table.partitions[0].bootable);
        assert!(table.partitions[1].is_lvm());
    }

    #[test]
    fn short_dos_id_is_padded() {
        assert_eq!(synthesize_dos_partuuid("0x1234", 0), "00001234-01");
        assert_eq!(synthesize_dos_partuuid("0xABCD1234", 15), "abcd1234-10");
    }

    #[test]
    fn byte_units_are_rejected() {
        let json = r#"{"partitiontable": {"label": "gpt", "unit": "bytes", "partitions": []}}"#;
        let err = PartitionTable::parse(json).unwrap_err();
        assert!(matches!(err, DisktreeError::UnsupportedPartitionUnit { unit } if unit == "bytes"));
    }

    #[test]
    fn oversized_partition_is_malformed() {
        let json = r#"{"partitiontable": {"label": "gpt", "unit": "sectors", "sectorsize": 4096,
            "partitions": [{"start": 2048, "size": 18446744073709551615, "type": "0FC63DAF-8483-4772-8E79-3D69D8477DE4", "uuid": "A"}]}}"#;
        let err = PartitionTable::parse(json).unwrap_err();
        assert!(matches!(err, DisktreeError::MalformedOutput { what: "sfdisk", .. }));
    }

    #[test]
    fn no_table_is_not_an_error() {
        let host = FakeHost::new();
        assert!(read(&host, Path::new("/dev/loop0")).unwrap().is_none());
    }

    #[test]
    fn report_elements_name_the_table() {
        let host = FakeHost::new();
        host.respond("sfdisk", ToolOutput::ok(DOS));
        let table = read(&host, Path::new("/dev/loop0")).unwrap().unwrap();
        let elements = table.report_elements().unwrap();
        assert_eq!(elements[0], ("partition-table", serde_json::json!("dos")));
        assert_eq!(elements[1], ("partition-table-id", serde_json::json!("0xabcd1234")));
        assert_eq!(elements[2].1[0]["type"], "83");
    }

    proptest! {
        #[test]
        fn synthesized_uuids_unique_and_stable(id in 0u32.., count in 1usize..128) {
            let table_id = format!("0x{id:08x}");
            let first: Vec<String> = (0..count).map(|i| synthesize_dos_partuuid(&table_id, i)).collect();
            let second: Vec<String> = (0..count).map(|i| synthesize_dos_partuuid(&table_id, i)).collect();
            prop_assert_eq!(&first, &second);

            let mut unique = first.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), first.len());
        }
    }
}
