//! The seven mutation strategies.
//!
//! Each strategy is a pure function from input bytes and a random source to
//! output bytes. Inputs too short for a strategy come back unchanged.

use rand::seq::SliceRandom;
use rand::Rng;

use super::buffer::{join_tokens, CommandBuffer};

/// Symbols used by [`insert_char`]
pub const SPECIAL_CHARS: &[u8] = b"!@#$%^&*()_-+=<>?/;:[]{}|\\\"~";

/// Whitespace bytes used by [`inject_whitespace`]
pub const WHITESPACE: &[u8] = b" \t\n\r";

/// Longest span [`duplicate_span`] will copy
pub const MAX_DUPLICATE_SPAN: usize = 100;

const BOOLEAN_LIKE: [&str; 4] = ["true", "false", "1", "0"];

fn pick<R: Rng + ?Sized>(set: &[u8], rng: &mut R) -> u8 {
    set[rng.gen_range(0..set.len())]
}

/// Insert one special character at a random offset.
pub fn insert_char<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut buf = CommandBuffer::new(input);
    let offset = rng.gen_range(0..=buf.len());
    buf.insert(offset, &[pick(SPECIAL_CHARS, rng)]);
    buf.into_bytes()
}

/// Duplicate a random span right after itself.
pub fn duplicate_span<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let len = input.len();
    if len <= 2 {
        return input.to_vec();
    }
    let mut buf = CommandBuffer::new(input);
    let start = rng.gen_range(0..len);
    let span = rng.gen_range(1..=MAX_DUPLICATE_SPAN.min(len - start));
    buf.duplicate(start, span);
    buf.into_bytes()
}

/// Delete one or two bytes, never the first one.
pub fn delete_span<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let len = input.len();
    if len <= 3 {
        return input.to_vec();
    }
    let mut buf = CommandBuffer::new(input);
    let start = rng.gen_range(1..=len - 2);
    let count = rng.gen_range(1..=2);
    buf.delete(start, count);
    buf.into_bytes()
}

/// Flip the case of one byte inside the first token.
pub fn toggle_case<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut buf = CommandBuffer::new(input);
    if let Some(token) = buf.first_token() {
        if token.len() > 1 {
            let index = rng.gen_range(token);
            buf.toggle_case(index);
        }
    }
    buf.into_bytes()
}

/// Insert a space, tab, LF or CR at a random offset.
pub fn inject_whitespace<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut buf = CommandBuffer::new(input);
    let offset = rng.gen_range(0..=buf.len());
    buf.insert(offset, &[pick(WHITESPACE, rng)]);
    buf.into_bytes()
}

/// Shuffle the arguments, swap two of them, or move the verb.
pub fn reorder_args<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut tokens = CommandBuffer::new(input).tokens();
    let count = tokens.len();
    if count < 3 {
        return input.to_vec();
    }

    match rng.gen_range(0..3) {
        0 => tokens[1..].shuffle(rng),
        1 => {
            let first = rng.gen_range(1..count);
            let mut second = rng.gen_range(1..count - 1);
            if second >= first {
                second += 1;
            }
            tokens.swap(first, second);
        }
        _ => {
            let verb = tokens.remove(0);
            let position = rng.gen_range(0..count);
            tokens.insert(position, verb);
        }
    }
    join_tokens(&tokens)
}

/// Replace one argument with a value of a different shape.
pub fn substitute_arg<R: Rng + ?Sized>(input: &[u8], rng: &mut R) -> Vec<u8> {
    let mut tokens = CommandBuffer::new(input).tokens();
    let count = tokens.len();
    if count < 2 {
        return input.to_vec();
    }

    let index = rng.gen_range(1..count);
    let replacement = match rng.gen_range(0..6) {
        0 => rng.gen::<i32>().to_string().into_bytes(),
        1 => rng
            .gen_range(1_000_000_000i64..=2_147_483_647)
            .to_string()
            .into_bytes(),
        2 => format!("{:.5}", rng.gen_range(-1e6f64..=1e6)).into_bytes(),
        3 => {
            let mut quoted = Vec::with_capacity(tokens[index].len() + 8);
            quoted.push(b'"');
            quoted.extend_from_slice(&tokens[index]);
            quoted.extend_from_slice(format!("_{}", rng.gen_range(1..=1000)).as_bytes());
            quoted.push(b'"');
            quoted
        }
        4 => BOOLEAN_LIKE[rng.gen_range(0..BOOLEAN_LIKE.len())]
            .as_bytes()
            .to_vec(),
        _ => format!("-{}", rng.gen_range(1..=1_000_000)).into_bytes(),
    };
    tokens[index] = replacement;
    join_tokens(&tokens)
}
