use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Standard Consumption Message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scm {
    pub id: u32,
    pub ert_type: u8,
    pub tamper_phy: u8,
    pub tamper_enc: u8,
    pub consumption: u32,
    pub checksum: u16,
}

/// SCM+ message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmPlus {
    pub frame_sync: u16,
    pub protocol_id: u8,
    pub endpoint_type: u8,
    pub endpoint_id: u32,
    pub consumption: u32,
    pub tamper: u16,
    pub packet_crc: u16,
}

/// Interval Data Message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idm {
    pub preamble: u32,
    pub packet_type_id: u8,
    pub packet_length: u8,
    pub hamming_code: u8,
    pub application_version: u8,
    pub ert_type: u8,
    pub ert_serial_number: u32,
    pub consumption_interval_count: u8,
    pub module_programming_state: u8,
    pub tamper_counters: Vec<u8>,
    pub asynchronous_counters: u16,
    pub power_outage_flags: Vec<u8>,
    pub last_consumption_count: u32,
    pub differential_consumption_intervals: Vec<u16>,
    pub transmit_time_offset: u16,
    pub serial_number_crc: u16,
    pub packet_crc: u16,
}

/// Net-metering Interval Data Message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIdm {
    pub preamble: u32,
    pub protocol_id: u8,
    pub packet_length: u8,
    pub hamming_code: u8,
    pub application_version: u8,
    pub ert_type: u8,
    pub ert_serial_number: u32,
    pub consumption_interval_count: u8,
    pub programming_state: u8,
    pub last_generation: u32,
    pub last_consumption: u32,
    pub last_consumption_net: u32,
    pub differential_consumption_intervals: Vec<u16>,
    pub transmit_time_offset: u16,
    pub serial_number_crc: u16,
    pub packet_crc: u16,
}

/// Neptune R900 reading, shared by the binary and BCD encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct R900 {
    pub id: u32,
    pub unkn1: u8,
    pub no_use: u8,
    pub back_flow: u8,
    pub consumption: u32,
    pub unkn3: u8,
    pub leak: u8,
    pub leak_now: u8,
    pub checksum: Vec<u8>,
}

/// One decoded transmission, tagged by protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum MeterMessage {
    Scm(Scm),
    #[serde(rename = "scm+")]
    ScmPlus(ScmPlus),
    Idm(Idm),
    NetIdm(NetIdm),
    R900(R900),
    R900Bcd(R900),
}

/// Identity of a physical transmission, used to spot repeated detections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub endpoint_id: u32,
    pub checksum: Vec<u8>,
}

impl MeterMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            MeterMessage::Scm(_) => "scm",
            MeterMessage::ScmPlus(_) => "scm+",
            MeterMessage::Idm(_) => "idm",
            MeterMessage::NetIdm(_) => "netidm",
            MeterMessage::R900(_) => "r900",
            MeterMessage::R900Bcd(_) => "r900bcd",
        }
    }

    pub fn endpoint_id(&self) -> u32 {
        match self {
            MeterMessage::Scm(m) => m.id,
            MeterMessage::ScmPlus(m) => m.endpoint_id,
            MeterMessage::Idm(m) => m.ert_serial_number,
            MeterMessage::NetIdm(m) => m.ert_serial_number,
            MeterMessage::R900(m) | MeterMessage::R900Bcd(m) => m.id,
        }
    }

    pub fn consumption(&self) -> u64 {
        match self {
            MeterMessage::Scm(m) => m.consumption.into(),
            MeterMessage::ScmPlus(m) => m.consumption.into(),
            MeterMessage::Idm(m) => m.last_consumption_count.into(),
            MeterMessage::NetIdm(m) => m.last_consumption.into(),
            MeterMessage::R900(m) | MeterMessage::R900Bcd(m) => m.consumption.into(),
        }
    }

    /// Integrity bytes carried by the transmission.
    pub fn checksum(&self) -> Vec<u8> {
        match self {
            MeterMessage::Scm(m) => m.checksum.to_be_bytes().to_vec(),
            MeterMessage::ScmPlus(m) => m.packet_crc.to_be_bytes().to_vec(),
            MeterMessage::Idm(m) => m.packet_crc.to_be_bytes().to_vec(),
            MeterMessage::NetIdm(m) => m.packet_crc.to_be_bytes().to_vec(),
            MeterMessage::R900(m) | MeterMessage::R900Bcd(m) => m.checksum.clone(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            endpoint_id: self.endpoint_id(),
            checksum: self.checksum(),
        }
    }

    /// Protocol-specific fields keyed the way the event store expects them.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        let pairs: Vec<(&str, Value)> = match self {
            MeterMessage::Scm(m) => vec![
                ("type", json!(m.ert_type)),
                ("tamperphy", json!(m.tamper_phy)),
                ("tamperenc", json!(m.tamper_enc)),
                ("checksum", json!(m.checksum)),
            ],
            MeterMessage::ScmPlus(m) => vec![
                ("framesync", json!(m.frame_sync)),
                ("protocolid", json!(m.protocol_id)),
                ("endpointtype", json!(m.endpoint_type)),
                ("tamper", json!(m.tamper)),
                ("packetcrc", json!(m.packet_crc)),
            ],
            MeterMessage::Idm(m) => vec![
                ("preamble", json!(m.preamble)),
                ("packettypeid", json!(m.packet_type_id)),
                ("packetlength", json!(m.packet_length)),
                ("hammingcode", json!(m.hamming_code)),
                ("applicationversion", json!(m.application_version)),
                ("erttype", json!(m.ert_type)),
                ("ertserialnumber", json!(m.ert_serial_number)),
                ("consumptionintervalcount", json!(m.consumption_interval_count)),
                ("moduleprogrammingstate", json!(m.module_programming_state)),
                ("tampercounters", json!(m.tamper_counters)),
                ("asynchronouscounters", json!(m.asynchronous_counters)),
                ("poweroutageflags", json!(m.power_outage_flags)),
                ("lastconsumptioncount", json!(m.last_consumption_count)),
                (
                    "differentialconsumptionintervals",
                    json!(m.differential_consumption_intervals),
                ),
                ("transmittimeoffset", json!(m.transmit_time_offset)),
                ("serialnumbercrc", json!(m.serial_number_crc)),
                ("packetcrc", json!(m.packet_crc)),
            ],
            MeterMessage::NetIdm(m) => vec![
                ("preamble", json!(m.preamble)),
                ("protocolid", json!(m.protocol_id)),
                ("packetlength", json!(m.packet_length)),
                ("hammingcode", json!(m.hamming_code)),
                ("applicationversion", json!(m.application_version)),
                ("erttype", json!(m.ert_type)),
                ("ertserialnumber", json!(m.ert_serial_number)),
                ("consumptionintervalcount", json!(m.consumption_interval_count)),
                ("programmingstate", json!(m.programming_state)),
                ("lastgeneration", json!(m.last_generation)),
                ("lastconsumption", json!(m.last_consumption)),
                ("lastconsumptionnet", json!(m.last_consumption_net)),
                (
                    "differentialconsumptionintervals",
                    json!(m.differential_consumption_intervals),
                ),
                ("transmittimeoffset", json!(m.transmit_time_offset)),
                ("serialnumbercrc", json!(m.serial_number_crc)),
                ("packetcrc", json!(m.packet_crc)),
            ],
            MeterMessage::R900(m) | MeterMessage::R900Bcd(m) => vec![
                ("unkn1", json!(m.unkn1)),
                ("nouse", json!(m.no_use)),
                ("backflow", json!(m.back_flow)),
                ("unkn3", json!(m.unkn3)),
                ("leak", json!(m.leak)),
                ("leaknow", json!(m.leak_now)),
                ("checksum", json!(m.checksum)),
            ],
        };

        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scm(id: u32, checksum: u16) -> MeterMessage {
        MeterMessage::Scm(Scm {
            id,
            ert_type: 7,
            tamper_phy: 0,
            tamper_enc: 1,
            consumption: 1200,
            checksum,
        })
    }

    #[test]
    fn fingerprint_combines_endpoint_and_checksum() {
        assert_eq!(scm(10, 0xBEEF).fingerprint(), scm(10, 0xBEEF).fingerprint());
        assert_ne!(scm(10, 0xBEEF).fingerprint(), scm(10, 0xBEEE).fingerprint());
        assert_ne!(scm(10, 0xBEEF).fingerprint(), scm(11, 0xBEEF).fingerprint());
    }

    #[test]
    fn r900_variants_share_fields_but_not_type() {
        let reading = R900 {
            id: 99,
            unkn1: 0,
            no_use: 2,
            back_flow: 0,
            consumption: 5000,
            unkn3: 0,
            leak: 1,
            leak_now: 0,
            checksum: vec![0xAB, 0xCD, 0xEF],
        };
        let plain = MeterMessage::R900(reading.clone());
        let bcd = MeterMessage::R900Bcd(reading);

        assert_eq!(plain.msg_type(), "r900");
        assert_eq!(bcd.msg_type(), "r900bcd");
        assert_eq!(plain.fields(), bcd.fields());
        assert_eq!(plain.checksum(), vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn scm_fields_use_store_keys() {
        let fields = scm(1, 0x0102).fields();
        assert_eq!(fields["type"], json!(7));
        assert_eq!(fields["checksum"], json!(0x0102));
        assert_eq!(fields.len(), 4);
    }
}
