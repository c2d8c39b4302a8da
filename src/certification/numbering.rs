//! Certificate numbers and batch codes.
//!
//! A certificate number is `D<level><trainer><ddmmyy><mode><seq>`, for
//! example `D1SK150825ON0001`. A batch code is
//! `DECODE-L<level>-<trainer>-<ddmmyy>-<seq>`. In both the sequence counts
//! existing values sharing the prefix and is zero-padded to four digits.

use time::Date;

use crate::db::models::{DeliveryMode, ProgramLevel};

pub const SEQUENCE_WIDTH: usize = 4;

/// First ASCII digit of the level label.
pub fn level_digit(level: ProgramLevel) -> char {
    level
        .label()
        .chars()
        .find(char::is_ascii_digit)
        .unwrap_or('0')
}

/// Two upper-case letters identifying the trainer.
pub fn trainer_code(name: &str) -> String {
    let tokens: Vec<&str> = name.split_whitespace().collect();

    let code: String = match tokens.as_slice() {
        [] => "XX".to_string(),
        [only] => {
            let mut chars = only.chars();
            let first = chars.next().unwrap_or('X');
            let second = chars.next().unwrap_or('X');
            [first, second].iter().collect()
        }
        [first, second, ..] => first
            .chars()
            .take(1)
            .chain(second.chars().take(1))
            .collect(),
    };

    code.to_uppercase()
}

/// `ddmmyy`.
pub fn date_code(date: Date) -> String {
    format!(
        "{:02}{:02}{:02}",
        date.day(),
        u8::from(date.month()),
        date.year().rem_euclid(100)
    )
}

pub fn mode_code(mode: DeliveryMode) -> &'static str {
    if mode.label().to_ascii_lowercase().starts_with("on") {
        "ON"
    } else {
        "OF"
    }
}

pub fn format_sequence(sequence: u64) -> String {
    format!("{:0width$}", sequence, width = SEQUENCE_WIDTH)
}

pub fn certificate_prefix(
    level: ProgramLevel,
    trainer_name: &str,
    date: Date,
    mode: DeliveryMode,
) -> String {
    format!(
        "D{}{}{}{}",
        level_digit(level),
        trainer_code(trainer_name),
        date_code(date),
        mode_code(mode)
    )
}

/// Number following `existing` certificates that share `prefix`.
pub fn certificate_number(prefix: &str, existing: u64) -> String {
    format!("{}{}", prefix, format_sequence(existing + 1))
}

pub fn batch_code_prefix(level: ProgramLevel, trainer_name: &str, start_date: Date) -> String {
    format!(
        "DECODE-L{}-{}-{}-",
        level_digit(level),
        trainer_code(trainer_name),
        date_code(start_date)
    )
}

pub fn batch_code(prefix: &str, existing: u64) -> String {
    format!("{}{}", prefix, format_sequence(existing + 1))
}
