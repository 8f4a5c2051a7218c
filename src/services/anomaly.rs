//! Scan anomaly detection.
//!
//! Two signals mark a scan suspicious: many repeats of the same code from
//! roughly the same place inside a short window, and scans of one code from
//! places too far apart to travel between in the elapsed time. Detection is
//! advisory; any backend failure here downgrades to "no anomaly" so the
//! verification verdict itself is never blocked.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::config::AnomalyConfig;
use crate::models::Geolocation;
use crate::services::cache::VerificationCache;
use crate::services::database::CodeStore;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates, in kilometres.
pub fn haversine_km(a: &Geolocation, b: &Geolocation) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

pub struct AnomalyDetector {
    store: Arc<dyn CodeStore>,
    cache: Arc<dyn VerificationCache>,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(
        store: Arc<dyn CodeStore>,
        cache: Arc<dyn VerificationCache>,
        config: AnomalyConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Returns `true` when the scan looks suspicious.
    pub async fn check(
        &self,
        code: &str,
        code_id: Uuid,
        location: Option<&Geolocation>,
    ) -> bool {
        let Some(location) = location else {
            // Unlocated scans carry no signal for either check.
            return false;
        };

        if self.rapid_repeat(code, location).await {
            return true;
        }

        self.geo_velocity(code_id, location).await
    }

    /// Counts scans of this code near this location. Coordinates are rounded
    /// to ~100m so jitter from the same spot lands in one bucket.
    async fn rapid_repeat(&self, code: &str, location: &Geolocation) -> bool {
        let key = format!(
            "rapid_verify:{}:{:.3}:{:.3}",
            code, location.latitude, location.longitude
        );
        match self
            .cache
            .incr_window(&key, self.config.rapid_repeat_window_seconds)
            .await
        {
            Ok(count) => count > self.config.rapid_repeat_threshold,
            Err(e) => {
                warn!(error = %e, "Rapid-repeat counter unavailable, skipping check");
                false
            }
        }
    }

    /// Flags the scan when any located scan of this code inside the
    /// geo-velocity window is further away than plausible travel allows.
    async fn geo_velocity(&self, code_id: Uuid, location: &Geolocation) -> bool {
        let history = match self
            .store
            .recent_located_scans(
                code_id,
                self.config.geo_velocity_window_seconds,
                self.config.geo_history_limit,
            )
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "Scan history unavailable, skipping geo-velocity check");
                return false;
            }
        };

        let now = Utc::now();
        for scan in &history {
            let prior = Geolocation {
                latitude: scan.latitude,
                longitude: scan.longitude,
            };
            let distance = haversine_km(&prior, location);
            let elapsed = now - scan.verified_at;
            if distance > self.config.geo_velocity_km
                && elapsed < chrono::Duration::seconds(self.config.geo_velocity_window_seconds as i64)
            {
                return true;
            }
        }
        false
    }
}
