use chrono::{DateTime, Utc};
use rand::Rng;

use super::identity::MacAddress;
use crate::common::{Bounds, DeviceKind, DeviceRecord, Point2D, SimResult, SimulationError};

#[derive(Debug, Clone, PartialEq)]
pub struct TagState {
    pub target_point: Point2D,
    pub speed: f64,
}

/// Capability split between the two device variants.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceRole {
    Anchor,
    Tag(TagState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    name: String,
    mac_address: MacAddress,
    position: Point2D,
    randomizer: f64,
    cluster_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    role: DeviceRole,
}

impl Device {
    pub fn new(
        mac_address: MacAddress,
        position: Point2D,
        randomizer: f64,
        cluster_name: Option<String>,
        role: DeviceRole,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: mac_address.station_name(),
            mac_address,
            position,
            randomizer,
            cluster_name,
            created_at: now,
            updated_at: now,
            role,
        }
    }

    /// Fresh device at a random position. A new tag starts with its target on
    /// its own position, so the first arrival check hands it a real target.
    pub fn generate<R: Rng + ?Sized>(
        kind: DeviceKind,
        mac_address: MacAddress,
        bounds: &Bounds,
        speed: f64,
        cluster_name: Option<String>,
        rng: &mut R,
    ) -> Self {
        let position = bounds.random_point(rng);
        let randomizer = rng.gen_range(0.1..0.9);
        let role = match kind {
            DeviceKind::Anchor => DeviceRole::Anchor,
            DeviceKind::Tag => DeviceRole::Tag(TagState {
                target_point: position,
                speed,
            }),
        };
        Self::new(mac_address, position, randomizer, cluster_name, role)
    }

    /// Rebuild a device from its persisted record. Positions stored under
    /// different bounds are clamped into the current environment.
    pub fn from_record(record: &DeviceRecord, speed: f64, bounds: &Bounds) -> SimResult<Self> {
        let mac_address: MacAddress = record.mac_address.parse()?;
        if !record.position.is_finite() {
            return Err(SimulationError::Persistence(format!(
                "Stored position of {} is not finite",
                record.name
            )));
        }
        let position = bounds.clamp(record.position);

        let role = match record.kind {
            DeviceKind::Anchor => DeviceRole::Anchor,
            DeviceKind::Tag => {
                let target_point = record
                    .target_point
                    .filter(Point2D::is_finite)
                    .map(|t| bounds.clamp(t))
                    .unwrap_or(position);
                DeviceRole::Tag(TagState {
                    target_point,
                    speed,
                })
            }
        };

        Ok(Self {
            name: record.name.clone(),
            mac_address,
            position,
            randomizer: record.randomizer.clamp(0.0, 1.0),
            cluster_name: record.cluster_name.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            role,
        })
    }

    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord {
            name: self.name.clone(),
            kind: self.kind(),
            mac_address: self.mac_address.to_string(),
            position: self.position,
            target_point: self.target_point(),
            randomizer: self.randomizer,
            cluster_name: self.cluster_name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    pub fn kind(&self) -> DeviceKind {
        match self.role {
            DeviceRole::Anchor => DeviceKind::Anchor,
            DeviceRole::Tag(_) => DeviceKind::Tag,
        }
    }

    pub fn role(&self) -> &DeviceRole {
        &self.role
    }

    pub fn is_tag(&self) -> bool {
        matches!(self.role, DeviceRole::Tag(_))
    }

    pub fn position(&self) -> Point2D {
        self.position
    }

    pub fn target_point(&self) -> Option<Point2D> {
        match &self.role {
            DeviceRole::Anchor => None,
            DeviceRole::Tag(tag) => Some(tag.target_point),
        }
    }

    pub fn speed(&self) -> Option<f64> {
        match &self.role {
            DeviceRole::Anchor => None,
            DeviceRole::Tag(tag) => Some(tag.speed),
        }
    }

    pub fn randomizer(&self) -> f64 {
        self.randomizer
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    pub(crate) fn set_position(&mut self, position: Point2D) {
        self.position = position;
        self.updated_at = Utc::now();
    }

    /// Anchors have no target; the call is ignored for them.
    pub(crate) fn set_target_point(&mut self, target_point: Point2D) {
        if let DeviceRole::Tag(tag) = &mut self.role {
            tag.target_point = target_point;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn generated_tag_targets_its_own_position() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let bounds = Bounds::new(100.0, 100.0);
        let mac = MacAddress::random(&mut rng);
        let tag = Device::generate(DeviceKind::Tag, mac, &bounds, 5.0, None, &mut rng);

        assert!(tag.is_tag());
        assert_eq!(tag.target_point(), Some(tag.position()));
        assert_eq!(tag.speed(), Some(5.0));
        assert!((0.1..0.9).contains(&tag.randomizer()));
        assert_eq!(tag.name(), mac.station_name());
    }

    #[test]
    fn record_round_trip_preserves_identity_and_geometry() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let bounds = Bounds::new(100.0, 100.0);
        let mac = MacAddress::random(&mut rng);
        let anchor = Device::generate(
            DeviceKind::Anchor,
            mac,
            &bounds,
            0.0,
            Some("hall".to_string()),
            &mut rng,
        );

        let record = anchor.to_record();
        assert_eq!(record.target_point, None);

        let restored = Device::from_record(&record, 0.0, &bounds).unwrap();
        assert_eq!(restored, anchor);
    }

    #[test]
    fn records_outside_bounds_are_clamped() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let big = Bounds::new(1000.0, 1000.0);
        let small = Bounds::new(10.0, 10.0);
        let mac = MacAddress::random(&mut rng);
        let mut record =
            Device::generate(DeviceKind::Tag, mac, &big, 1.0, None, &mut rng).to_record();
        record.position = Point2D::new(500.0, 2.0);
        record.target_point = Some(Point2D::new(800.0, 800.0));

        let tag = Device::from_record(&record, 1.0, &small).unwrap();
        assert_eq!(tag.position(), Point2D::new(10.0, 2.0));
        assert_eq!(tag.target_point(), Some(Point2D::new(10.0, 10.0)));
    }

    #[test]
    fn anchors_ignore_target_updates() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let bounds = Bounds::new(10.0, 10.0);
        let mac = MacAddress::random(&mut rng);
        let mut anchor = Device::generate(DeviceKind::Anchor, mac, &bounds, 0.0, None, &mut rng);
        anchor.set_target_point(Point2D::new(1.0, 1.0));
        assert_eq!(anchor.target_point(), None);
    }
}
