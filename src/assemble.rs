//! Dense output cube: every observed country × required sector × output gas.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::types::{gas::OUTPUT_GASES, EmissionsRow, YearSeries, TONNES};

/// Merges gap-filled native gases with both CO2e series and reindexes the
/// result over the full cross-product.
///
/// Rows without a country id are dropped. Triples with no computed row get
/// an all-zero series; a computed row keeps its absent cells. When a triple
/// appears twice the first occurrence wins. Every output row is labelled
/// `output_source` / tonnes.
pub fn assemble(
    filled: &[EmissionsRow],
    co2e_20: &[EmissionsRow],
    co2e_100: &[EmissionsRow],
    required_sectors: &[String],
    output_source: &str,
) -> Vec<EmissionsRow> {
    let mut ids: BTreeSet<&str> = BTreeSet::new();
    let mut computed: HashMap<(&str, &str, &str), YearSeries> = HashMap::new();
    let mut dropped = 0usize;

    for row in filled.iter().chain(co2e_20).chain(co2e_100) {
        if !row.has_id() {
            dropped += 1;
            continue;
        }
        ids.insert(row.id.as_str());
        computed
            .entry((row.id.as_str(), row.sector.as_str(), row.gas.as_str()))
            .or_insert(row.values);
    }
    if dropped > 0 {
        debug!(rows = dropped, "dropped rows without a country id");
    }

    let sectors: BTreeSet<&str> = required_sectors.iter().map(String::as_str).collect();
    let mut out = Vec::with_capacity(ids.len() * sectors.len() * OUTPUT_GASES.len());
    let mut synthesized = 0usize;

    for id in &ids {
        for sector in &sectors {
            for gas in OUTPUT_GASES {
                let values = match computed.get(&(*id, *sector, gas)) {
                    Some(values) => *values,
                    None => {
                        synthesized += 1;
                        YearSeries::zeros()
                    }
                };
                out.push(EmissionsRow::new(*id, *sector, gas, output_source, TONNES, values));
            }
        }
    }

    info!(
        countries = ids.len(),
        sectors = sectors.len(),
        rows = out.len(),
        synthesized,
        "assembled output cube"
    );
    out
}
