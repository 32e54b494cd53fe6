// =============================================================================
// Journal feature blob — order-stable key=value encoding for the `features`
// table's `data_blob` column
// =============================================================================
//
// Plain serde_json would re-order or escape differently across versions;
// the journal wants a deterministic, greppable text blob instead.
// =============================================================================

use anyhow::{anyhow, Result};

use crate::features::FeatureVector;

const FIELDS: &[&str] = &[
    "ask_dom",
    "spread_pct",
    "gap_above",
    "sweep_rejection",
    "volatility_burst",
    "short_momentum",
    "funding_impulse",
    "oi_divergence",
    "btc_alignment",
    "liquidity_pressure",
    "orderflow_imbalance",
    "near_resistance",
    "price_falling",
    "spread_not_collapsing",
    "btc_not_pumping",
];

pub fn encode(feat: &FeatureVector) -> Result<String> {
    let values = [
        feat.ask_dom.to_string(),
        feat.spread_pct.to_string(),
        feat.gap_above.to_string(),
        feat.sweep_rejection.to_string(),
        feat.volatility_burst.to_string(),
        feat.short_momentum.to_string(),
        feat.funding_impulse.to_string(),
        feat.oi_divergence.to_string(),
        feat.btc_alignment.to_string(),
        feat.liquidity_pressure.to_string(),
        feat.orderflow_imbalance.to_string(),
        feat.near_resistance.to_string(),
        feat.price_falling.to_string(),
        feat.spread_not_collapsing.to_string(),
        feat.btc_not_pumping.to_string(),
    ];
    Ok(FIELDS
        .iter()
        .zip(values.iter())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";"))
}

pub fn decode(blob: &str) -> Result<FeatureVector> {
    let mut feat = FeatureVector::default();
    for pair in blob.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "ask_dom" => feat.ask_dom = parse_f64(value)?,
            "spread_pct" => feat.spread_pct = parse_f64(value)?,
            "gap_above" => feat.gap_above = parse_f64(value)?,
            "sweep_rejection" => feat.sweep_rejection = parse_f64(value)?,
            "volatility_burst" => feat.volatility_burst = parse_f64(value)?,
            "short_momentum" => feat.short_momentum = parse_f64(value)?,
            "funding_impulse" => feat.funding_impulse = parse_f64(value)?,
            "oi_divergence" => feat.oi_divergence = parse_f64(value)?,
            "btc_alignment" => feat.btc_alignment = parse_f64(value)?,
            "liquidity_pressure" => feat.liquidity_pressure = parse_f64(value)?,
            "orderflow_imbalance" => feat.orderflow_imbalance = parse_f64(value)?,
            "near_resistance" => feat.near_resistance = parse_f64(value)?,
            "price_falling" => feat.price_falling = parse_bool(value)?,
            "spread_not_collapsing" => feat.spread_not_collapsing = parse_bool(value)?,
            "btc_not_pumping" => feat.btc_not_pumping = parse_bool(value)?,
            _ => {}
        }
    }
    Ok(feat)
}

fn parse_f64(v: &str) -> Result<f64> {
    v.parse().map_err(|_| anyhow!("invalid float in feature blob: {v}"))
}

fn parse_bool(v: &str) -> Result<bool> {
    v.parse().map_err(|_| anyhow!("invalid bool in feature blob: {v}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let feat = FeatureVector {
            ask_dom: 0.72,
            oi_divergence: 0.1,
            btc_not_pumping: true,
            price_falling: true,
            ..Default::default()
        };
        let blob = encode(&feat).unwrap();
        let decoded = decode(&blob).unwrap();
        assert_eq!(decoded.ask_dom, feat.ask_dom);
        assert_eq!(decoded.oi_divergence, feat.oi_divergence);
        assert_eq!(decoded.btc_not_pumping, feat.btc_not_pumping);
        assert_eq!(decoded.price_falling, feat.price_falling);
    }

    #[test]
    fn encoded_field_order_is_stable() {
        let feat = FeatureVector::default();
        let blob = encode(&feat).unwrap();
        assert!(blob.starts_with("ask_dom="));
        assert!(blob.contains(";spread_pct="));
    }
}
