use std::sync::LazyLock;

use regex::Regex;

/// Characters that end a keyword's value clause.
const CLAUSE_BOUNDS: &str = r"\n\r，。,；;";

const MORE_INFO_PHRASES: [&str; 6] = [
    "需要更多信息",
    "信息不足",
    "请提供",
    "请补充",
    "补充信息",
    "无法提供",
];

const COOL_WARMTH: f32 = 0.97;
const WARM_WARMTH: f32 = 1.03;
const NEUTRAL_KELVIN: f32 = 6500.0;
const MIN_KELVIN: f32 = 1000.0;

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([+\-]?[0-9]+(?:\.[0-9]+)?)\s*(?:~|～|-|–|—|至)\s*([+\-]?[0-9]+(?:\.[0-9]+)?)")
        .expect("range pattern is valid")
});
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+\-]?[0-9]+(?:\.[0-9]+)?").expect("number pattern is valid"));
static KELVIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{4,5})\s*[kK]").expect("kelvin pattern is valid"));

static EXPOSURE_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("曝光"));
static CONTRAST_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("对比度?"));
static SATURATION_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("饱和度"));
static WARMTH_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("色温"));
static HIGHLIGHTS_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("高光"));
static SHADOWS_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("阴影"));
static WHITES_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("白色"));
static BLACKS_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("黑色"));
static CLARITY_RE: LazyLock<Regex> = LazyLock::new(|| clause_regex("清晰度"));

fn clause_regex(keyword: &str) -> Regex {
    Regex::new(format!("{keyword}([^{CLAUSE_BOUNDS}]*)").as_str())
        .expect("adjustment keyword pattern is valid")
}

/// Parsed grading directives. `None` means leave that dimension alone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdjustmentSet {
    pub exposure: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub warmth: Option<f32>,
    pub highlights: Option<f32>,
    pub shadows: Option<f32>,
    pub whites: Option<f32>,
    pub blacks: Option<f32>,
    pub clarity: Option<f32>,
}

impl AdjustmentSet {
    pub fn is_empty(&self) -> bool {
        self.present_keys().is_empty()
    }

    pub fn present_keys(&self) -> Vec<&'static str> {
        [
            ("exposure", self.exposure),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
            ("warmth", self.warmth),
            ("highlights", self.highlights),
            ("shadows", self.shadows),
            ("whites", self.whites),
            ("blacks", self.blacks),
            ("clarity", self.clarity),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|_| key))
        .collect()
    }
}

pub fn parse_adjustments(reply: &str) -> AdjustmentSet {
    if reply.trim().is_empty() {
        return AdjustmentSet::default();
    }
    AdjustmentSet {
        exposure: parse_exposure(reply),
        contrast: parse_contrast(reply),
        saturation: parse_saturation(reply),
        warmth: parse_warmth(reply),
        highlights: parse_highlights(reply),
        shadows: parse_shadows(reply),
        whites: parse_whites(reply),
        blacks: parse_blacks(reply),
        clarity: parse_clarity(reply),
    }
}

/// Percent-style exposure, stored as a multiplier offset in [-0.5, 0.5].
pub fn parse_exposure(reply: &str) -> Option<f32> {
    clause_value(&EXPOSURE_RE, reply).map(|v| (v / 100.0).clamp(-0.5, 0.5))
}

pub fn parse_contrast(reply: &str) -> Option<f32> {
    clause_value(&CONTRAST_RE, reply).map(|v| (1.0 + v / 100.0).clamp(0.5, 1.5))
}

pub fn parse_saturation(reply: &str) -> Option<f32> {
    clause_value(&SATURATION_RE, reply).map(|v| (1.0 + v / 100.0).clamp(0.5, 1.5))
}

pub fn parse_highlights(reply: &str) -> Option<f32> {
    clause_value(&HIGHLIGHTS_RE, reply).map(clamp_tone)
}

pub fn parse_shadows(reply: &str) -> Option<f32> {
    clause_value(&SHADOWS_RE, reply).map(clamp_tone)
}

pub fn parse_whites(reply: &str) -> Option<f32> {
    clause_value(&WHITES_RE, reply).map(clamp_tone)
}

pub fn parse_blacks(reply: &str) -> Option<f32> {
    clause_value(&BLACKS_RE, reply).map(clamp_tone)
}

pub fn parse_clarity(reply: &str) -> Option<f32> {
    clause_value(&CLARITY_RE, reply).map(clamp_tone)
}

/// Red/blue balance multiplier in [0.85, 1.15].
///
/// A 色温 clause with a Kelvin figure maps that temperature (range means
/// included) onto the scale; any other number there is a percent shift.
/// Otherwise cues are read from the clause, then from the whole reply:
/// a Kelvin figure, then 冷, then 暖.
pub fn parse_warmth(reply: &str) -> Option<f32> {
    for caps in WARMTH_RE.captures_iter(reply) {
        let Some(clause) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if let Some(kelvin) = kelvin_value(clause) {
            return Some(warmth_from_kelvin(kelvin));
        }
        if let Some(shift) = parse_range_value(clause) {
            return Some(clamp_warmth(1.0 + shift / 100.0));
        }
        if let Some(warmth) = warmth_from_cues(clause) {
            return Some(warmth);
        }
    }
    warmth_from_cues(reply)
}

fn warmth_from_cues(text: &str) -> Option<f32> {
    if let Some(kelvin) = KELVIN_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
    {
        return Some(warmth_from_kelvin(kelvin));
    }
    if text.contains('冷') {
        return Some(COOL_WARMTH);
    }
    if text.contains('暖') {
        return Some(WARM_WARMTH);
    }
    None
}

/// Kelvin temperature named in a clause. A range mean counts only when it
/// is itself a temperature; otherwise the `K`-suffixed figures are averaged.
fn kelvin_value(clause: &str) -> Option<f32> {
    let figures = KELVIN_RE
        .captures_iter(clause)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse::<f32>().ok())
        .take(2)
        .collect::<Vec<_>>();
    if figures.is_empty() {
        return None;
    }
    if let Some(mean) = parse_range_value(clause).filter(|mean| *mean >= MIN_KELVIN) {
        return Some(mean);
    }
    Some(figures.iter().sum::<f32>() / figures.len() as f32)
}

fn warmth_from_kelvin(kelvin: f32) -> f32 {
    let delta = (kelvin - NEUTRAL_KELVIN) / NEUTRAL_KELVIN;
    clamp_warmth(1.0 + delta * 0.15)
}

fn clamp_warmth(value: f32) -> f32 {
    value.clamp(0.85, 1.15)
}

fn clamp_tone(value: f32) -> f32 {
    value.clamp(-100.0, 100.0)
}

/// First occurrence of the keyword whose clause carries a number.
fn clause_value(pattern: &Regex, reply: &str) -> Option<f32> {
    pattern
        .captures_iter(reply)
        .filter_map(|caps| caps.get(1))
        .find_map(|clause| parse_range_value(clause.as_str()))
}

/// Mean of a `a~b` style range, else the first signed number.
pub fn parse_range_value(text: &str) -> Option<f32> {
    if let Some(caps) = RANGE_RE.captures(text) {
        let low = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok());
        let high = caps.get(2).and_then(|m| m.as_str().parse::<f32>().ok());
        if let (Some(low), Some(high)) = (low, high) {
            return Some((low + high) / 2.0);
        }
    }
    NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().parse::<f32>().ok())
}

/// True when the reply asks the user for more input instead of grading.
pub fn reply_requests_more_info(reply: &str) -> bool {
    MORE_INFO_PHRASES
        .iter()
        .any(|phrase| reply.contains(phrase))
}
