//! PDF object parser.
//!
//! Builds [`Object`] values from the token stream produced by
//! [`crate::lexer`], including indirect references (`n g R`) and streams.

use std::collections::HashMap;

use nom::IResult;

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Object, ObjectRef};

/// Decode the escape sequences of a literal string body.
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 == raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut octal = (escaped - b'0') as u32;
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            octal = octal * 8 + (d - b'0') as u32;
                            i += 1;
                        },
                        _ => break,
                    }
                }
                result.push((octal & 0xFF) as u8);
            },
            other => result.push(other),
        }
    }

    result
}

fn fail(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse one PDF object.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),
        Token::Integer(i) => {
            // "id gen R" looks like two integers until the R arrives
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if (0..=u32::MAX as i64).contains(&i) && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },
        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(bytes) => Ok((input, Object::String(decode_literal_string_escapes(bytes)))),
        Token::HexString(hex) => match decode_hex(hex) {
            Ok(decoded) => Ok((input, Object::String(decoded))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::HexDigit,
            ))),
        },
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input),
        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input)?;

            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (rest, data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }

            Ok((remaining, Object::Dictionary(dict)))
        },
        _ => Err(fail(input)),
    }
}

/// Parse an indirect object header and body: `id gen obj <object> endobj`.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = token(input)?;
    let (rest, gen) = token(rest)?;
    let (rest, keyword) = token(rest)?;

    let obj_ref = match (id, gen, keyword) {
        (Token::Integer(id), Token::Integer(gen), Token::ObjStart) if id >= 0 && gen >= 0 => {
            ObjectRef::new(id as u32, gen as u16)
        },
        _ => return Err(fail(input)),
    };

    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => {
            log::warn!("Object {} is missing its endobj keyword", obj_ref);
            rest
        },
    };

    Ok((rest, (obj_ref, object)))
}

fn parse_stream_data<'a>(
    input: &'a [u8],
    dict: &HashMap<String, Object>,
) -> IResult<&'a [u8], Vec<u8>> {
    let input = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\r") {
        log::warn!("Stream keyword followed by a lone CR");
        rest
    } else {
        log::warn!("No end-of-line after stream keyword");
        input
    };

    // A direct /Length is trusted when "endstream" follows it; indirect
    // lengths fall through to the keyword scan.
    if let Some(length) = dict.get("Length").and_then(|o| o.as_integer()) {
        let length = length as usize;
        if length <= input.len() {
            if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                return Ok((rest, input[..length].to_vec()));
            }
        }
        log::warn!("Stream /Length {} does not reach endstream, scanning", length);
    }

    let keyword = b"endstream";
    match input.windows(keyword.len()).position(|w| w == keyword) {
        Some(pos) => {
            let mut data = &input[..pos];
            if let Some(trimmed) = data.strip_suffix(b"\r\n") {
                data = trimmed;
            } else if let Some(trimmed) = data.strip_suffix(b"\n") {
                data = trimmed;
            }
            Ok((&input[pos + keyword.len()..], data.to_vec()))
        },
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        let (after, tok) = token(remaining)?;
        if tok == Token::ArrayEnd {
            return Ok((after, Object::Array(objects)));
        }

        let (after, obj) = parse_object(remaining)?;
        objects.push(obj);
        remaining = after;
    }
}

fn parse_dictionary(input: &[u8]) -> IResult<&[u8], HashMap<String, Object>> {
    let mut dict = HashMap::new();
    let mut remaining = input;

    loop {
        let (after, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((after, dict)),
            Token::Name(key) => {
                let (after, value) = parse_object(after)?;
                // A null value is equivalent to the key being absent
                if !value.is_null() {
                    dict.insert(key, value);
                }
                remaining = after;
            },
            _ => return Err(fail(remaining)),
        }
    }
}

/// Decode the content of a hex string, ignoring whitespace.
///
/// An odd trailing digit is completed with 0 as ISO 32000-1 requires.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        (c as char).to_digit(16).map(|d| d as u8).ok_or_else(|| Error::ParseError {
            offset: 0,
            reason: format!("Invalid hex digit: {:?}", c as char),
        })
    };

    digits
        .chunks(2)
        .map(|pair| {
            let high = nibble(pair[0])?;
            let low = match pair.get(1) {
                Some(&c) => nibble(c)?,
                None => 0,
            };
            Ok(high << 4 | low)
        })
        .collect()
}

/// Parse the object that starts at `offset`, tolerating leading whitespace.
pub(crate) fn parse_indirect_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or(Error::ParseError {
        offset,
        reason: "offset beyond end of file".to_string(),
    })?;

    match parse_indirect_object(skip_ws(slice)) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Incomplete(_)) => Err(Error::ParseError {
            offset,
            reason: "truncated indirect object".to_string(),
        }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::ParseError {
            offset: data.len() - e.input.len(),
            reason: format!("indirect object starting at {}: {:?}", offset, e.code),
        }),
    }
}
