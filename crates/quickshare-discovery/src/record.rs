//! Advertisement record.
//!
//! Shaped after a DNS-SD service record:
//!
//! ```text
//! instance name = base64url( 0x23 | endpoint_id[4] | service_id_hash[3] | 0x00 0x00 )
//! port          = session listener port
//! TXT "n"       = base64url( flags | reserved[16] | name_len | name )
//! flags         = version << 5 | hidden << 4 | device_type << 1
//! ```

use crate::{Capabilities, DiscoveryError, Endpoint, EndpointId, EndpointInfo, ENDPOINT_ID_LEN};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Service type browsed and advertised
pub const SERVICE_TYPE: &str = "_FC9F5ED42C8A._tcp.local.";

const PCP: u8 = 0x23;
const SERVICE_ID_HASH: [u8; 3] = [0xFC, 0x9F, 0x5E];
const INSTANCE_NAME_LEN: usize = 1 + ENDPOINT_ID_LEN + 3 + 2;
const TXT_ENDPOINT_INFO: &str = "n";
const RESERVED_LEN: usize = 16;
const INFO_HEADER_LEN: usize = 1 + RESERVED_LEN + 1;

/// Longest device name that fits the length byte
pub const MAX_DEVICE_NAME_LEN: usize = u8::MAX as usize;

/// One advertised service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Encoded instance name
    pub instance_name: String,
    /// Session listener port
    pub port: u16,
    /// TXT key/value pairs
    pub txt: Vec<(String, String)>,
}

impl ServiceRecord {
    /// Build the record advertising `info`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidRecord`] if the device name is
    /// longer than [`MAX_DEVICE_NAME_LEN`] bytes.
    pub fn from_info(info: &EndpointInfo) -> Result<Self, DiscoveryError> {
        let name = info.name.as_bytes();
        if name.len() > MAX_DEVICE_NAME_LEN {
            return Err(DiscoveryError::InvalidRecord(format!(
                "device name is {} bytes, limit {MAX_DEVICE_NAME_LEN}",
                name.len()
            )));
        }

        let mut instance = Vec::with_capacity(INSTANCE_NAME_LEN);
        instance.push(PCP);
        instance.extend_from_slice(&info.id.to_bytes());
        instance.extend_from_slice(&SERVICE_ID_HASH);
        instance.extend_from_slice(&[0, 0]);

        let mut reserved = [0u8; RESERVED_LEN];
        rand::thread_rng().fill(&mut reserved);

        let mut blob = Vec::with_capacity(INFO_HEADER_LEN + name.len());
        blob.push(info.capabilities.to_byte());
        blob.extend_from_slice(&reserved);
        blob.push(name.len() as u8);
        blob.extend_from_slice(name);

        Ok(Self {
            instance_name: URL_SAFE_NO_PAD.encode(instance),
            port: info.port,
            txt: vec![(TXT_ENDPOINT_INFO.to_string(), URL_SAFE_NO_PAD.encode(blob))],
        })
    }

    /// Look up a TXT value.
    #[must_use]
    pub fn txt_value(&self, key: &str) -> Option<&str> {
        self.txt
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Decode the endpoint id from the instance name.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidRecord`] if the instance name does
    /// not belong to this service.
    pub fn endpoint_id(&self) -> Result<EndpointId, DiscoveryError> {
        let raw = URL_SAFE_NO_PAD
            .decode(&self.instance_name)
            .map_err(|e| DiscoveryError::InvalidRecord(format!("instance name: {e}")))?;
        if raw.len() != INSTANCE_NAME_LEN || raw[0] != PCP {
            return Err(DiscoveryError::InvalidRecord(
                "instance name has wrong shape".to_string(),
            ));
        }
        if raw[5..8] != SERVICE_ID_HASH {
            return Err(DiscoveryError::InvalidRecord(
                "foreign service id".to_string(),
            ));
        }
        let id = std::str::from_utf8(&raw[1..5])
            .map_err(|_| DiscoveryError::InvalidEndpointId(format!("{:?}", &raw[1..5])))?;
        EndpointId::parse(id)
    }

    /// Resolve into an [`Endpoint`] reachable at `host`.
    ///
    /// An empty advertised name falls back to the endpoint id.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidRecord`] for short, truncated, or
    /// non-UTF-8 endpoint info.
    pub fn to_endpoint(&self, host: IpAddr) -> Result<Endpoint, DiscoveryError> {
        let id = self.endpoint_id()?;
        let encoded = self
            .txt_value(TXT_ENDPOINT_INFO)
            .ok_or_else(|| DiscoveryError::InvalidRecord("missing endpoint info".to_string()))?;
        let blob = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| DiscoveryError::InvalidRecord(format!("endpoint info: {e}")))?;
        if blob.len() < INFO_HEADER_LEN {
            return Err(DiscoveryError::InvalidRecord(format!(
                "endpoint info is {} bytes, need {INFO_HEADER_LEN}",
                blob.len()
            )));
        }

        let capabilities = Capabilities::from_byte(blob[0]);
        let name_len = blob[INFO_HEADER_LEN - 1] as usize;
        let name_bytes = blob
            .get(INFO_HEADER_LEN..INFO_HEADER_LEN + name_len)
            .ok_or_else(|| DiscoveryError::InvalidRecord("device name truncated".to_string()))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| DiscoveryError::InvalidRecord("device name not UTF-8".to_string()))?;
        let name = if name.is_empty() {
            id.to_string()
        } else {
            name.to_string()
        };

        Ok(Endpoint {
            id,
            name,
            addr: SocketAddr::new(host, self.port),
            capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceType;
    use std::net::Ipv4Addr;

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    fn info(name: &str) -> EndpointInfo {
        EndpointInfo::new(EndpointId::parse("Lp7q").unwrap(), name, 54321)
    }

    #[test]
    fn test_record_resolves_to_endpoint() {
        let record = ServiceRecord::from_info(&info("laptop")).unwrap();
        let endpoint = record.to_endpoint(HOST).unwrap();

        assert_eq!(endpoint.id.as_str(), "Lp7q");
        assert_eq!(endpoint.name, "laptop");
        assert_eq!(endpoint.addr, SocketAddr::new(HOST, 54321));
        assert_eq!(endpoint.capabilities.device_type, DeviceType::Laptop);
        assert!(endpoint.capabilities.visible);
    }

    #[test]
    fn test_instance_name_layout() {
        let record = ServiceRecord::from_info(&info("x")).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&record.instance_name).unwrap();
        assert_eq!(raw, [0x23, b'L', b'p', b'7', b'q', 0xFC, 0x9F, 0x5E, 0, 0]);
    }

    #[test]
    fn test_empty_name_falls_back_to_id() {
        let record = ServiceRecord::from_info(&info("")).unwrap();
        assert_eq!(record.to_endpoint(HOST).unwrap().name, "Lp7q");
    }

    #[test]
    fn test_oversized_name_rejected() {
        let long = "n".repeat(MAX_DEVICE_NAME_LEN + 1);
        assert!(ServiceRecord::from_info(&info(&long)).is_err());
        assert!(ServiceRecord::from_info(&info(&"n".repeat(MAX_DEVICE_NAME_LEN))).is_ok());
    }

    #[test]
    fn test_truncated_info_rejected() {
        let mut record = ServiceRecord::from_info(&info("laptop")).unwrap();
        let blob = URL_SAFE_NO_PAD
            .decode(record.txt_value("n").unwrap())
            .unwrap();
        record.txt = vec![(
            "n".to_string(),
            URL_SAFE_NO_PAD.encode(&blob[..blob.len() - 2]),
        )];
        assert!(matches!(
            record.to_endpoint(HOST),
            Err(DiscoveryError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_missing_txt_rejected() {
        let mut record = ServiceRecord::from_info(&info("laptop")).unwrap();
        record.txt.clear();
        assert!(record.to_endpoint(HOST).is_err());
    }

    #[test]
    fn test_foreign_instance_rejected() {
        let mut record = ServiceRecord::from_info(&info("laptop")).unwrap();
        record.instance_name = URL_SAFE_NO_PAD.encode([0x23, b'a', b'b', b'c', b'd', 1, 2, 3, 0, 0]);
        assert!(record.endpoint_id().is_err());
        record.instance_name = "!!not base64!!".to_string();
        assert!(record.endpoint_id().is_err());
    }
}
