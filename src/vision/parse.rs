//! Numeric extraction from OCR text

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Smallest gold or elixir amount worth reading; anything below is UI noise
pub const RESOURCE_FLOOR: u64 = 1000;

/// Smallest dark elixir amount considered
pub const DARK_ELIXIR_FLOOR: u64 = 100;

/// A number token. Either a decimal with a magnitude suffix (`1.2k`) or an
/// integer with optional thousands separators (space, no-break space, comma,
/// period) and an optional suffix. Separators never span lines.
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<int>\d+)[.,](?P<frac>\d{1,2}) ?(?P<dsuf>[kKmM])|(?P<num>\d{1,3}(?:[ \u{00A0},.]\d{3})+|\d+)(?: ?(?P<suf>[kKmM]))?",
    )
    .expect("number pattern is valid")
});

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

/// Gold, elixir and dark elixir amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub gold: u64,
    pub elixir: u64,
    pub dark_elixir: u64,
}

impl ResourceCounts {
    pub fn new(gold: u64, elixir: u64, dark_elixir: u64) -> Self {
        Self {
            gold,
            elixir,
            dark_elixir,
        }
    }

    /// Nothing was read at all
    pub fn is_zero(&self) -> bool {
        self.gold == 0 && self.elixir == 0 && self.dark_elixir == 0
    }

    /// The two main resources are both missing
    pub fn main_missing(&self) -> bool {
        self.gold == 0 && self.elixir == 0
    }

    /// Number of nonzero amounts
    pub fn filled(&self) -> u8 {
        [self.gold, self.elixir, self.dark_elixir]
            .iter()
            .filter(|v| **v > 0)
            .count() as u8
    }

    pub fn total(&self) -> u64 {
        self.gold
            .saturating_add(self.elixir)
            .saturating_add(self.dark_elixir)
    }
}

fn multiplier(suffix: &str) -> u64 {
    match suffix {
        "k" | "K" => 1_000,
        "m" | "M" => 1_000_000,
        _ => 1,
    }
}

fn token_value(caps: &Captures<'_>) -> Option<u64> {
    if let Some(int) = caps.name("int") {
        let whole: u64 = int.as_str().parse().ok()?;
        let frac = caps.name("frac")?.as_str();
        let mult = multiplier(caps.name("dsuf")?.as_str());
        // Two-digit fractions are hundredths, one-digit tenths; truncated
        let frac_value: u64 = frac.parse().ok()?;
        let scale = if frac.len() == 1 { 10 } else { 100 };
        return Some(
            whole
                .saturating_mul(mult)
                .saturating_add(frac_value.saturating_mul(mult) / scale),
        );
    }

    let digits: String = caps
        .name("num")?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let value: u64 = digits.parse().ok()?;
    let mult = caps.name("suf").map_or(1, |s| multiplier(s.as_str()));
    Some(value.saturating_mul(mult))
}

/// Every number in the text, in order of appearance
pub fn numbers(text: &str) -> Vec<u64> {
    NUMBER
        .captures_iter(text)
        .filter_map(|caps| token_value(&caps))
        .collect()
}

/// Assign numbers to resources from the scouted-base loot block.
///
/// The block lists gold, elixir, then dark elixir. The first two tokens at or
/// above [`RESOURCE_FLOOR`] are gold and elixir; the first token after elixir
/// at or above [`DARK_ELIXIR_FLOOR`] is dark elixir. A slot still empty is
/// filled from the largest unused tokens that clear its floor.
pub fn assign_resources(values: &[u64]) -> ResourceCounts {
    let mut used = vec![false; values.len()];
    let mut counts = ResourceCounts::default();

    let mut majors = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v >= RESOURCE_FLOOR);

    if let Some((i, v)) = majors.next() {
        counts.gold = *v;
        used[i] = true;
    }
    if let Some((i, v)) = majors.next() {
        counts.elixir = *v;
        used[i] = true;
        if let Some((j, v)) = values
            .iter()
            .enumerate()
            .skip(i + 1)
            .find(|(_, v)| **v >= DARK_ELIXIR_FLOOR)
        {
            counts.dark_elixir = *v;
            used[j] = true;
        }
    }

    let mut spare: Vec<u64> = values
        .iter()
        .zip(&used)
        .filter(|(_, taken)| !**taken)
        .map(|(v, _)| *v)
        .collect();
    spare.sort_unstable_by(|a, b| b.cmp(a));

    let mut fill = |slot: &mut u64, floor: u64| {
        if *slot == 0 {
            if let Some(pos) = spare.iter().position(|v| *v >= floor) {
                *slot = spare.remove(pos);
            }
        }
    };
    fill(&mut counts.gold, RESOURCE_FLOOR);
    fill(&mut counts.elixir, RESOURCE_FLOOR);
    fill(&mut counts.dark_elixir, DARK_ELIXIR_FLOOR);

    counts
}

/// Parse the loot block text of a scouted base
pub fn parse_resources(text: &str) -> ResourceCounts {
    assign_resources(&numbers(text))
}

/// Largest number in the text, 0 when there is none
pub fn largest_number(text: &str) -> u64 {
    numbers(text).into_iter().max().unwrap_or(0)
}

/// The three largest numbers assigned to gold, elixir, dark elixir in that order
pub fn top_three(text: &str) -> ResourceCounts {
    let mut values = numbers(text);
    values.sort_unstable_by(|a, b| b.cmp(a));
    let at = |i: usize| values.get(i).copied().unwrap_or(0);
    ResourceCounts::new(at(0), at(1), at(2))
}

/// First bare digit run, 0 when there is none
pub fn parse_troop_count(text: &str) -> u32 {
    DIGIT_RUN
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}
