//! Call-data encoding: `function@hexArg@hexArg...`.

use crate::error::VmHostError;

const SEPARATOR: u8 = b'@';

/// Parser for the `@`-separated call data carried by transfers and async
/// calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallArgsParser;

impl CallArgsParser {
    /// Split call data into the function name and its decoded arguments.
    pub fn parse_data(data: &[u8]) -> Result<(String, Vec<Vec<u8>>), VmHostError> {
        let mut tokens = data.split(|b| *b == SEPARATOR);
        let function = tokens.next().unwrap_or_default();
        if function.is_empty() {
            return Err(VmHostError::InvalidCallData("empty function name".into()));
        }
        let function = std::str::from_utf8(function)
            .map_err(|_| VmHostError::InvalidCallData("function name is not utf-8".into()))?
            .to_string();
        let arguments = tokens.map(decode_argument).collect::<Result<_, _>>()?;
        Ok((function, arguments))
    }

    /// Decode `@hex@hex` data with no function name, as produced by
    /// callbacks.
    pub fn parse_arguments(data: &[u8]) -> Result<Vec<Vec<u8>>, VmHostError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut tokens = data.split(|b| *b == SEPARATOR);
        if tokens.next().is_some_and(|first| !first.is_empty()) {
            return Err(VmHostError::InvalidCallData(
                "arguments must start with a separator".into(),
            ));
        }
        tokens.map(decode_argument).collect()
    }

    /// Encode a function call.
    pub fn build_data(function: &str, arguments: &[Vec<u8>]) -> Vec<u8> {
        let mut data = function.as_bytes().to_vec();
        for argument in arguments {
            data.push(SEPARATOR);
            data.extend_from_slice(hex::encode(argument).as_bytes());
        }
        data
    }
}

fn decode_argument(token: &[u8]) -> Result<Vec<u8>, VmHostError> {
    hex::decode(token).map_err(|e| VmHostError::InvalidCallData(e.to_string()))
}
