//! Respiratory statistics derived from raw sensor samples.
//!
//! Runs on a fixed cadence (`STATISTICS_PERIOD`).  Each tick integrates flow
//! into the volume of the current phase, tracks peak and mean pressure, and
//! on a phase edge closes out the previous phase: tidal volume, Ti/Te,
//! respiratory rate, I:E and minute volumes.  The phase always comes from the
//! valve controller.
//!
//! The inspired volume integrator restarts at zero at every inspiration onset.
//! That bounds integration drift but means the value is volume delivered in
//! this breath, not absolute lung volume.

use libm::fabsf;

use crate::config::STATISTICS_PERIOD;
use crate::data_structs::{BreathPhase, RespiratoryStatistics, SensorSample, Setpoints};
use crate::sensors::SensorPort;
use crate::signal_processing::{MeanAccumulator, PeakDetector};
use crate::store::{ContentionPolicy, SharedStatisticsStore, WRITER_POLICY};
use crate::time_util::{elapsed, Clock, Duration, Instant, PeriodTimer};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StatisticsConfig {
    pub period: Duration,
    pub contention: ContentionPolicy,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        StatisticsConfig {
            period: STATISTICS_PERIOD,
            contention: WRITER_POLICY,
        }
    }
}

/// Result of one call to [`StatisticsEngine::service`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PollOutcome {
    /// Not due yet, nothing acquired.
    Idle,
    Published(RespiratoryStatistics),
    /// Computed but the store was busy; the previous snapshot stays.
    Dropped(RespiratoryStatistics),
    /// Computed, store busy, will be republished on the next call.
    Deferred(RespiratoryStatistics),
}

pub struct StatisticsEngine {
    config: StatisticsConfig,
    timer: PeriodTimer,
    statistics: RespiratoryStatistics,
    setpoints: Setpoints,
    last_phase: BreathPhase,
    inspiration_started: Option<Instant>,
    expiration_started: Option<Instant>,
    inspired_ml: f32,
    expired_ml: f32,
    peak: PeakDetector,
    mean: MeanAccumulator,
    peep_estimate: Option<f32>,
    unpublished: bool,
}

impl StatisticsEngine {
    /// The ventilator boots into expiration, so `start` counts as the
    /// start of the first expiration.
    pub fn new(config: StatisticsConfig, start: Instant) -> StatisticsEngine {
        StatisticsEngine {
            config,
            timer: PeriodTimer::new(config.period, start),
            statistics: RespiratoryStatistics::UNMEASURED,
            setpoints: Setpoints::default(),
            last_phase: BreathPhase::Expiration,
            inspiration_started: None,
            expiration_started: Some(start),
            inspired_ml: 0.0,
            expired_ml: 0.0,
            peak: PeakDetector::default(),
            mean: MeanAccumulator::default(),
            peep_estimate: None,
            unpublished: false,
        }
    }

    /// Latest computed snapshot, published or not.
    pub fn latest(&self) -> RespiratoryStatistics {
        self.statistics
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    /// Updates the statistics if a period has elapsed, otherwise does nothing
    /// at all and returns `None`.
    pub fn poll(
        &mut self,
        now: Instant,
        sample: &SensorSample,
        phase: BreathPhase,
    ) -> Option<RespiratoryStatistics> {
        if !self.timer.poll(now) {
            return None;
        }
        Some(self.update(now, sample, phase))
    }

    /// Statistics task body: acquire, update and publish.
    pub fn service<C: Clock, S: SensorPort>(
        &mut self,
        clock: &C,
        port: &mut S,
        store: &SharedStatisticsStore,
    ) -> PollOutcome {
        let now = clock.now();
        if !self.is_due(now) {
            if self.unpublished {
                return self.publish(store);
            }
            return PollOutcome::Idle;
        }

        let sample = port.acquire();
        if self.poll(now, &sample, store.phase()).is_none() {
            return PollOutcome::Idle;
        }
        self.publish(store)
    }

    fn publish(&mut self, store: &SharedStatisticsStore) -> PollOutcome {
        let statistics = self.statistics;
        match store.publish(&statistics, &self.setpoints) {
            Ok(_) => {
                self.unpublished = false;
                PollOutcome::Published(statistics)
            }
            Err(_) => match self.config.contention {
                ContentionPolicy::DropTick => {
                    trace!("statistics store busy, tick dropped");
                    self.unpublished = false;
                    PollOutcome::Dropped(statistics)
                }
                ContentionPolicy::RetryAfter(_) => {
                    self.unpublished = true;
                    PollOutcome::Deferred(statistics)
                }
            },
        }
    }

    fn update(
        &mut self,
        now: Instant,
        sample: &SensorSample,
        phase: BreathPhase,
    ) -> RespiratoryStatistics {
        // Volume per measurement period
        let dt_s = self.config.period.to_millis() as f32 / 1000.0;
        let dv_ml = sample.flow * 1000.0 / 60.0 * dt_s;

        match (self.last_phase, phase) {
            (BreathPhase::Expiration, BreathPhase::Inspiration) => self.begin_inspiration(now),
            (BreathPhase::Inspiration, BreathPhase::Expiration) => self.begin_expiration(now),
            _ => {}
        }
        self.last_phase = phase;

        match phase {
            BreathPhase::Inspiration => self.inspired_ml += dv_ml,
            BreathPhase::Expiration => self.expired_ml += dv_ml,
        }

        // Invalid flow must not touch the pressure statistics
        let s = &mut self.statistics;
        if sample.pressure.is_finite() {
            self.peak.push(sample.pressure);
            self.mean.push(sample.pressure);
            if phase == BreathPhase::Expiration {
                // PEEP is taken at the end of expiration, not at the edge into it
                self.peep_estimate = Some(sample.pressure);
            }
            s.pressure = sample.pressure;
        }
        if sample.o2_line_pressure.is_finite() {
            s.o2_line_pressure = sample.o2_line_pressure;
        }
        s.flow = sample.flow;
        s.inspired_volume = self.inspired_ml;
        s.o2_percent = sample.setpoints.o2_percent;
        s.phase = phase;
        self.setpoints = sample.setpoints;

        self.statistics
    }

    fn begin_inspiration(&mut self, now: Instant) {
        let s = &mut self.statistics;
        s.tidal_volume_expired = fabsf(self.expired_ml);
        self.expired_ml = 0.0;
        if let Some(started) = self.expiration_started {
            s.te = seconds(elapsed(now, started));
        }
        self.inspiration_started = Some(now);
        self.refresh_rate();

        let s = &mut self.statistics;
        s.minute_volume_expired = s.respiratory_rate * s.tidal_volume_expired / 1000.0;

        // Close out the pressure statistics of the breath that just ended
        if let Some(peak) = self.peak.take() {
            s.peak_pressure = peak;
        }
        if let Some(mean) = self.mean.take() {
            s.mean_pressure = mean;
        }
        if let Some(peep) = self.peep_estimate.take() {
            s.peep = peep;
        }

        self.inspired_ml = 0.0;
        debug!(
            "inspiration: te {} s, vte {} mL, rr {}",
            s.te, s.tidal_volume_expired, s.respiratory_rate
        );
    }

    fn begin_expiration(&mut self, now: Instant) {
        let s = &mut self.statistics;
        s.tidal_volume_inspired = self.inspired_ml;
        if let Some(started) = self.inspiration_started {
            s.ti = seconds(elapsed(now, started));
        }
        self.expiration_started = Some(now);
        self.refresh_rate();

        let s = &mut self.statistics;
        s.minute_volume_inspired = s.respiratory_rate * s.tidal_volume_inspired / 1000.0;
        debug!(
            "expiration: ti {} s, vti {} mL, rr {}",
            s.ti, s.tidal_volume_inspired, s.respiratory_rate
        );
    }

    // RR and I:E need one measured Ti and one measured Te
    fn refresh_rate(&mut self) {
        let s = &mut self.statistics;
        if s.ti > 0.0 && s.te > 0.0 {
            s.respiratory_rate = 60.0 / (s.te + s.ti);
            s.ie_ratio = s.ti / s.te;
        }
    }
}

fn seconds(d: Duration) -> f32 {
    d.to_millis() as f32 / 1000.0
}
