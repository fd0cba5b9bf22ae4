//! Conversion of flat 32-bit transfer words into frame arrays.
//!
//! Words arrive frame-major, then element, then (for spectra) grade slice, then energy bin.
//! Scalers are four words per element in the order total, reset, in-window, live clock.
//! The hardware counters are unsigned but transports hand them over as signed words, so every
//! word is reinterpreted as unsigned as soon as it is read.
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use ndarray::{Array3, Array4};

use super::constants::{BYTES_PER_WORD, SCALERS_PER_ELEMENT};
use super::error::DecodeError;

/// Dimensions of one decoded window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub frames: usize,
    pub elements: usize,
    pub grade_slices: usize,
    pub mca_size: usize,
}

impl FrameShape {
    pub fn scaler_words(&self) -> usize {
        self.frames * self.elements * SCALERS_PER_ELEMENT
    }

    pub fn spectrum_words(&self) -> usize {
        self.frames * self.elements * self.grade_slices * self.mca_size
    }
}

/// Decoded scalers [frame][element][counter] and, when read, spectra [frame][element][grade][bin]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWindow {
    pub scalers: Array3<u32>,
    pub spectra: Option<Array4<u32>>,
}

impl DecodedWindow {
    pub fn frame_count(&self) -> usize {
        self.scalers.shape()[0]
    }
}

/// Widen a signed transport word to the unsigned value it carries; never negative
pub fn widen(word: i32) -> i64 {
    if word < 0 {
        word as i64 + (1i64 << 32)
    } else {
        word as i64
    }
}

fn check_word_count(words: &[i32], expected: usize) -> Result<(), DecodeError> {
    if words.len() != expected {
        return Err(DecodeError::WordCountMismatch {
            expected,
            found: words.len(),
        });
    }
    Ok(())
}

pub fn decode_scalers(
    words: &[i32],
    frames: usize,
    elements: usize,
) -> Result<Array3<u32>, DecodeError> {
    check_word_count(words, frames * elements * SCALERS_PER_ELEMENT)?;
    let unsigned: Vec<u32> = words.iter().map(|w| *w as u32).collect();
    Ok(Array3::from_shape_vec(
        (frames, elements, SCALERS_PER_ELEMENT),
        unsigned,
    )?)
}

pub fn decode_spectra(words: &[i32], shape: &FrameShape) -> Result<Array4<u32>, DecodeError> {
    check_word_count(words, shape.spectrum_words())?;
    let unsigned: Vec<u32> = words.iter().map(|w| *w as u32).collect();
    Ok(Array4::from_shape_vec(
        (
            shape.frames,
            shape.elements,
            shape.grade_slices,
            shape.mca_size,
        ),
        unsigned,
    )?)
}

/// Decode one window. Fails if either transfer does not hold exactly the words the shape implies.
pub fn decode(
    scaler_words: &[i32],
    spectrum_words: Option<&[i32]>,
    shape: &FrameShape,
) -> Result<DecodedWindow, DecodeError> {
    let scalers = decode_scalers(scaler_words, shape.frames, shape.elements)?;
    let spectra = match spectrum_words {
        Some(words) => Some(decode_spectra(words, shape)?),
        None => None,
    };
    Ok(DecodedWindow { scalers, spectra })
}

/// Flatten scalers back into transport order
pub fn encode_scalers(scalers: &Array3<u32>) -> Vec<i32> {
    scalers.iter().map(|v| *v as i32).collect()
}

/// Flatten spectra back into transport order
pub fn encode_spectra(spectra: &Array4<u32>) -> Vec<i32> {
    spectra.iter().map(|v| *v as i32).collect()
}

/// Convert a big-endian byte dump into transport words
pub fn words_from_be_bytes(bytes: &[u8]) -> Result<Vec<i32>, DecodeError> {
    if bytes.len() % BYTES_PER_WORD != 0 {
        return Err(DecodeError::PartialWord(bytes.len()));
    }
    let mut words = vec![0; bytes.len() / BYTES_PER_WORD];
    BigEndian::read_i32_into(bytes, &mut words);
    Ok(words)
}

/// Convert transport words into a big-endian byte dump
pub fn words_to_be_bytes(words: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * BYTES_PER_WORD);
    for word in words {
        // writes into a Vec cannot fail
        let _ = bytes.write_i32::<BigEndian>(*word);
    }
    bytes
}
