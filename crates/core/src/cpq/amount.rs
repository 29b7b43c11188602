use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::pricing::whole_to_u64;

const STOP_WORDS: &[&str] = &[
    "money", "buy", "want", "i", "id", "like", "to", "get", "need", "please", "of", "game",
    "cash", "some", "the", "a", "an",
];
const THOUSAND_SUFFIXES: &[&str] = &["k", "thousand", "grand"];
const MILLION_SUFFIXES: &[&str] = &["m", "mil", "mill", "million", "millions"];
const MAX_WORDS: &[&str] = &["max", "maximum", "maxed", "allin"];
const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];
const NUMBER_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "twenty",
    "fifty", "hundred", "half", "quarter", "couple", "few",
];

/// Result of reading an amount out of free text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParsedAmount {
    Quantity(u64),
    Max,
}

impl ParsedAmount {
    /// Concrete quantity, never above `max_quantity`.
    pub fn clamp_to(self, max_quantity: u64) -> u64 {
        match self {
            Self::Quantity(quantity) => quantity.min(max_quantity),
            Self::Max => max_quantity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Number(String),
    Word(String),
}

/// Reads a base-currency amount from free text.
///
/// Numeric tokens (`700`, `1.5`) take an optional multiplier word right after
/// them (`k`, `grand`, `m`, `mil`, `million`, ...), and every token found is
/// summed so `"1 mil 750k"` reads as 1,750,000. Any max word short-circuits to
/// [`ParsedAmount::Max`]. Returns `None` when nothing numeric is present, when
/// the sum overflows, or when it rounds to zero.
pub fn parse_amount(text: &str) -> Option<ParsedAmount> {
    let tokens = tokenize(&normalize(text));
    if is_max_request(&tokens) {
        return Some(ParsedAmount::Max);
    }

    let mut total = Decimal::ZERO;
    let mut found = false;
    let mut index = 0;
    while index < tokens.len() {
        let Token::Number(digits) = &tokens[index] else {
            index += 1;
            continue;
        };

        let mut value = Decimal::from_str(digits).ok()?;
        if let Some(Token::Word(word)) = tokens.get(index + 1) {
            if let Some(multiplier) = multiplier_for(word) {
                value = value.checked_mul(Decimal::from(multiplier))?;
                index += 1;
            }
        }

        total = total.checked_add(value)?;
        found = true;
        index += 1;
    }

    if !found {
        return None;
    }
    match whole_to_u64(total)? {
        0 => None,
        quantity => Some(ParsedAmount::Quantity(quantity)),
    }
}

/// Whether `text` mentions anything amount-like (a digit, a multiplier or
/// number word, or a max word), even when [`parse_amount`] cannot read it.
pub fn has_amount_hint(text: &str) -> bool {
    let tokens = tokenize(&normalize(text));
    is_max_request(&tokens)
        || tokens.iter().any(|token| match token {
            Token::Number(_) => true,
            // Lone `k` / `m` come from contractions like "i'm" far more often.
            Token::Word(word) if word.len() == 1 => false,
            Token::Word(word) => {
                multiplier_for(word).is_some() || NUMBER_WORDS.contains(&word.as_str())
            }
        })
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|character| *character != ',' && !CURRENCY_SYMBOLS.contains(character))
        .collect()
}

fn tokenize(normalized: &str) -> Vec<Token> {
    let characters: Vec<char> = normalized.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < characters.len() {
        let character = characters[index];
        if character.is_ascii_digit() {
            let start = index;
            while index < characters.len() && characters[index].is_ascii_digit() {
                index += 1;
            }
            let has_fraction = characters.get(index) == Some(&'.')
                && characters.get(index + 1).is_some_and(|next| next.is_ascii_digit());
            if has_fraction {
                index += 1;
                while index < characters.len() && characters[index].is_ascii_digit() {
                    index += 1;
                }
            }
            tokens.push(Token::Number(characters[start..index].iter().collect()));
        } else if character.is_alphabetic() {
            let start = index;
            while index < characters.len() && characters[index].is_alphabetic() {
                index += 1;
            }
            let word: String = characters[start..index].iter().collect();
            if !STOP_WORDS.contains(&word.as_str()) {
                tokens.push(Token::Word(word));
            }
        } else {
            index += 1;
        }
    }

    tokens
}

fn is_max_request(tokens: &[Token]) -> bool {
    tokens.iter().enumerate().any(|(index, token)| match token {
        Token::Word(word) if MAX_WORDS.contains(&word.as_str()) => true,
        Token::Word(word) if word == "all" => {
            matches!(tokens.get(index + 1), Some(Token::Word(next)) if next == "in")
        }
        _ => false,
    })
}

fn multiplier_for(word: &str) -> Option<u64> {
    if THOUSAND_SUFFIXES.contains(&word) {
        Some(1_000)
    } else if MILLION_SUFFIXES.contains(&word) {
        Some(1_000_000)
    } else {
        None
    }
}
