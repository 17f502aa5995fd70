use crate::analyzers::tariff::TariffSchedule;
use crate::analyzers::types::{
    AggregationResult, BreakdownEntry, HourlyUsage, TrendInterval, TrendPoint,
};
use crate::analyzers::utility::{pct, pct_change};
use crate::records::UsageRecord;
use chrono::Timelike;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Aggregates timestamp-sorted usage records into totals, a bucketed trend,
/// device/location breakdowns and an hour-of-day histogram.
///
/// Pure: the same input always yields the same result.
pub fn aggregate_usage(
    records: &[UsageRecord],
    tariff: &TariffSchedule,
    interval: TrendInterval,
) -> AggregationResult {
    let total_energy: f64 = records.iter().map(|r| r.energy_consumed).sum();
    let total_cost = tariff.cost(total_energy);

    let trend = bucket_trend(records, interval);

    let device_sums = group_sums(records, |r| &r.device_id);
    let devices = breakdown(device_sums, total_energy, total_cost, |idx, _| {
        format!("Device {}", idx + 1)
    });

    let location_sums = group_sums(records, |r| &r.location);
    let locations = breakdown(location_sums, total_energy, total_cost, |_, key| {
        key.to_string()
    });

    let mut hourly: Vec<HourlyUsage> = (0..24)
        .map(|hour| HourlyUsage { hour, energy: 0.0 })
        .collect();
    for r in records {
        hourly[r.timestamp.hour() as usize].energy += r.energy_consumed;
    }

    debug!(
        records = records.len(),
        total_energy,
        buckets = trend.len(),
        devices = devices.len(),
        "Usage aggregated"
    );

    AggregationResult {
        record_count: records.len(),
        total_energy,
        total_cost,
        interval,
        trend,
        devices,
        locations,
        hourly,
        first_timestamp: records.first().map(|r| r.timestamp),
        last_timestamp: records.last().map(|r| r.timestamp),
    }
}

fn bucket_trend(records: &[UsageRecord], interval: TrendInterval) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<_, f64> = BTreeMap::new();
    for r in records {
        *buckets.entry(interval.bucket_start(r.timestamp)).or_default() += r.energy_consumed;
    }

    let mut previous: Option<f64> = None;
    buckets
        .into_iter()
        .map(|(bucket, energy)| {
            let point = TrendPoint {
                bucket,
                label: interval.label(bucket),
                energy,
                pct_change: previous.and_then(|prev| pct_change(prev, energy)),
            };
            previous = Some(energy);
            point
        })
        .collect()
}

/// Group sums keyed by `key`, in order of first appearance.
fn group_sums<'a, F>(records: &'a [UsageRecord], key: F) -> Vec<(String, f64)>
where
    F: Fn(&'a UsageRecord) -> &'a String,
{
    let mut order: Vec<(String, f64)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for r in records {
        let k = key(r);
        match index.get(k.as_str()) {
            Some(&i) => order[i].1 += r.energy_consumed,
            None => {
                index.insert(k.as_str(), order.len());
                order.push((k.clone(), r.energy_consumed));
            }
        }
    }

    order
}

/// Turns encounter-ordered group sums into display rows sorted by energy.
///
/// Cost is allocated by energy share so row costs add up to the total cost
/// under any tariff.
fn breakdown<L>(
    sums: Vec<(String, f64)>,
    total_energy: f64,
    total_cost: f64,
    label: L,
) -> Vec<BreakdownEntry>
where
    L: Fn(usize, &str) -> String,
{
    let mut entries: Vec<BreakdownEntry> = sums
        .into_iter()
        .enumerate()
        .map(|(idx, (key, energy))| {
            let percentage = pct(energy, total_energy);
            BreakdownEntry {
                label: label(idx, &key),
                key,
                energy,
                percentage,
                cost: total_cost * percentage / 100.0,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.energy.total_cmp(&a.energy).then_with(|| a.key.cmp(&b.key)));
    entries
}
