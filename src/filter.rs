//! Filter Set (C10): discard/select predicates over NMEA 0183 and
//! NMEA2000 traffic, plus a time-gated decimator for chatty PGNs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{FilterAction, FilterSetConfig, Nmea0183FilterConfig, Nmea2000FilterConfig};
use crate::generic_msg::{GenericMessage, Payload};

/// Periodic gate: `check_period` returns `true` at most once per period,
/// resetting on a fixed schedule rather than drifting with each call.
struct TimeGate {
    period: Duration,
    next_tick: Instant,
}

impl TimeGate {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next_tick: Instant::now() + period,
        }
    }

    fn check_period(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.next_tick {
            self.next_tick += self.period;
            if self.next_tick < now {
                self.next_tick = now + self.period;
            }
            true
        } else {
            false
        }
    }
}

struct Nmea0183Filter {
    name: String,
    action: FilterAction,
    talker: Option<String>,
    formatter: Option<String>,
}

impl Nmea0183Filter {
    fn matches(&self, talker: Option<&str>, formatter: Option<&str>) -> bool {
        let talker_ok = self.talker.as_deref().is_none_or(|t| Some(t) == talker);
        let formatter_ok = self.formatter.as_deref().is_none_or(|f| Some(f) == formatter);
        talker_ok && formatter_ok
    }
}

struct Nmea2000Filter {
    name: String,
    action: FilterAction,
    pgns: Vec<u32>,
    source: Option<u8>,
    /// Present only for time-gated (decimator) filters; keyed by PGN, with
    /// `0` used when the filter applies to every configured PGN.
    gates: Option<HashMap<u32, TimeGate>>,
}

impl Nmea2000Filter {
    fn matches(&self, pgn: u32, sa: u8) -> bool {
        let pgn_ok = self.pgns.is_empty() || self.pgns.contains(&pgn);
        let sa_ok = self.source.is_none_or(|s| s == sa);
        pgn_ok && sa_ok
    }

    /// Whether the message passes this filter's *action*, given it already
    /// matched. For ordinary filters this is the configured action; for a
    /// time-gated filter, `select` inverts the gate's result.
    fn action(&mut self, pgn: u32) -> bool {
        match &mut self.gates {
            None => self.action == FilterAction::Select,
            Some(gates) => {
                let key = if self.pgns.is_empty() { 0 } else { pgn };
                let gate = gates.entry(key).or_insert_with(|| TimeGate::new(Duration::from_secs(1)));
                let due = gate.check_period();
                match self.action {
                    FilterAction::Select => !due,
                    FilterAction::Discard => due,
                }
            }
        }
    }
}

/// Ordered set of filters; the first match in each category wins.
pub struct FilterSet {
    nmea0183: Vec<Nmea0183Filter>,
    nmea2000: Vec<Nmea2000Filter>,
}

impl FilterSet {
    pub fn empty() -> Self {
        Self {
            nmea0183: Vec::new(),
            nmea2000: Vec::new(),
        }
    }

    pub fn from_config(config: &FilterSetConfig) -> Self {
        let nmea0183 = config
            .nmea0183
            .iter()
            .map(|f: &Nmea0183FilterConfig| Nmea0183Filter {
                name: f.name.clone(),
                action: f.action,
                talker: f.talker.clone(),
                formatter: f.formatter.clone(),
            })
            .collect();

        let nmea2000 = config
            .nmea2000
            .iter()
            .map(|f: &Nmea2000FilterConfig| Nmea2000Filter {
                name: f.name.clone(),
                action: f.action,
                pgns: f.pgns.clone(),
                source: f.source,
                gates: f.period_seconds.map(|secs| {
                    let mut gates = HashMap::new();
                    if f.pgns.is_empty() {
                        gates.insert(0, TimeGate::new(Duration::from_secs_f64(secs)));
                    } else {
                        for pgn in &f.pgns {
                            gates.insert(*pgn, TimeGate::new(Duration::from_secs_f64(secs)));
                        }
                    }
                    gates
                }),
            })
            .collect();

        Self { nmea0183, nmea2000 }
    }

    /// Returns `true` if `msg` should be forwarded, `false` if it should
    /// be dropped. A message with no matching filter always passes.
    pub fn accept(&mut self, msg: &GenericMessage) -> bool {
        match &msg.payload {
            Payload::Nmea0183(sentence) => {
                let talker = sentence.talker();
                let formatter = sentence.formatter();
                for filter in &mut self.nmea0183 {
                    if filter.matches(talker, formatter) {
                        let result = filter.action == FilterAction::Select;
                        tracing::debug!(filter = filter.name.as_str(), result, "nmea0183 filter matched");
                        return result;
                    }
                }
                true
            }
            Payload::N2k(n2k) => {
                for filter in &mut self.nmea2000 {
                    if filter.matches(n2k.pgn, n2k.sa) {
                        let result = filter.action(n2k.pgn);
                        tracing::debug!(filter = filter.name.as_str(), result, "nmea2000 filter matched");
                        return result;
                    }
                }
                true
            }
            Payload::Null | Payload::Transparent(_) => true,
        }
    }
}
