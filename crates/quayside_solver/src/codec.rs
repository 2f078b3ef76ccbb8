//! Request encoding and response decoding for the solver wire format.

use crate::port::SolverError;

const CMD_SOLVE: u8 = 1;
const CMD_MONTE_CARLO: u8 = 2;

const STATUS_OPTIMAL: u8 = 0;
const STATUS_INFEASIBLE: u8 = 1;
const STATUS_ERROR: u8 = 2;

/// Sanity cap on peer-supplied frame lengths (16 MiB).
pub(crate) const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Invocation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMode {
    Solve,
    MonteCarlo { n_scenarios: u32 },
}

/// Variables in product-group-specific order plus the model shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverInput {
    /// `(variable key, value)` in frame order.
    pub variables: Vec<(String, f64)>,
    pub route_count: u32,
    pub constraint_count: u32,
}

/// Optimal-solve payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub profit: f64,
    pub tons: f64,
    pub vessels: f64,
    pub cost: f64,
    pub eff_barge: f64,
    pub route_tons: Vec<f64>,
    pub route_profits: Vec<f64>,
    pub margins: Vec<f64>,
    pub transits: Vec<f64>,
    pub shadow_prices: Vec<f64>,
}

/// Monte-carlo payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloResult {
    pub n_scenarios: u32,
    pub n_feasible: u32,
    pub n_infeasible: u32,
    pub mean: f64,
    pub stddev: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    /// Per-variable Pearson sensitivities, in descriptor order.
    pub sensitivities: Vec<f64>,
}

/// Decoded solver response.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverResponse {
    Optimal(SolveResult),
    MonteCarlo(MonteCarloResult),
    Infeasible,
}

/// Encode one request body (`cmd_byte || payload`).
pub fn encode_request(mode: SolveMode, input: &SolverInput) -> Vec<u8> {
    let mut body = Vec::with_capacity(64 + input.variables.len() * 16);
    match mode {
        SolveMode::Solve => body.push(CMD_SOLVE),
        SolveMode::MonteCarlo { n_scenarios } => {
            body.push(CMD_MONTE_CARLO);
            body.extend_from_slice(&n_scenarios.to_le_bytes());
        }
    }
    // Model descriptor.
    body.extend_from_slice(&(input.variables.len() as u32).to_le_bytes());
    for (key, _) in &input.variables {
        let name = key.as_bytes();
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend_from_slice(name);
    }
    body.extend_from_slice(&input.route_count.to_le_bytes());
    body.extend_from_slice(&input.constraint_count.to_le_bytes());
    // Variables block.
    for (_, value) in &input.variables {
        body.extend_from_slice(&value.to_le_bytes());
    }
    body
}

/// Decode one response body against the request's model shape.
pub fn decode_response(
    body: &[u8],
    mode: SolveMode,
    input: &SolverInput,
) -> Result<SolverResponse, SolverError> {
    let (&status, payload) = body
        .split_first()
        .ok_or_else(|| SolverError::Protocol("empty response body".to_string()))?;
    match status {
        STATUS_INFEASIBLE => Ok(SolverResponse::Infeasible),
        STATUS_ERROR => Err(SolverError::Engine(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        STATUS_OPTIMAL => match mode {
            SolveMode::Solve => decode_solve(payload, input).map(SolverResponse::Optimal),
            SolveMode::MonteCarlo { .. } => {
                decode_monte_carlo(payload, input).map(SolverResponse::MonteCarlo)
            }
        },
        other => Err(SolverError::Protocol(format!(
            "unknown response status byte {other}"
        ))),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn f64(&mut self) -> Result<f64, SolverError> {
        let chunk = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        Ok(f64::from_le_bytes(raw))
    }

    fn u32(&mut self) -> Result<u32, SolverError> {
        let chunk = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(chunk);
        Ok(u32::from_le_bytes(raw))
    }

    fn f64_vec(&mut self, len: usize) -> Result<Vec<f64>, SolverError> {
        (0..len).map(|_| self.f64()).collect()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SolverError> {
        if self.pos + len > self.bytes.len() {
            return Err(SolverError::Protocol(format!(
                "response payload truncated at offset {} (wanted {len} bytes of {})",
                self.pos,
                self.bytes.len()
            )));
        }
        let chunk = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(chunk)
    }
}

fn decode_solve(payload: &[u8], input: &SolverInput) -> Result<SolveResult, SolverError> {
    let r = input.route_count as usize;
    let c = input.constraint_count as usize;
    let mut reader = Reader::new(payload);
    Ok(SolveResult {
        profit: reader.f64()?,
        tons: reader.f64()?,
        vessels: reader.f64()?,
        cost: reader.f64()?,
        eff_barge: reader.f64()?,
        route_tons: reader.f64_vec(r)?,
        route_profits: reader.f64_vec(r)?,
        margins: reader.f64_vec(r)?,
        transits: reader.f64_vec(r)?,
        shadow_prices: reader.f64_vec(c)?,
    })
}

fn decode_monte_carlo(
    payload: &[u8],
    input: &SolverInput,
) -> Result<MonteCarloResult, SolverError> {
    let mut reader = Reader::new(payload);
    let n_scenarios = reader.u32()?;
    let n_feasible = reader.u32()?;
    let n_infeasible = reader.u32()?;
    let mean = reader.f64()?;
    let stddev = reader.f64()?;
    let p5 = reader.f64()?;
    let p25 = reader.f64()?;
    let p50 = reader.f64()?;
    let p75 = reader.f64()?;
    let p95 = reader.f64()?;
    let min = reader.f64()?;
    let max = reader.f64()?;
    let _reserved = reader.f64()?;
    let sensitivities = reader.f64_vec(input.variables.len())?;
    Ok(MonteCarloResult {
        n_scenarios,
        n_feasible,
        n_infeasible,
        mean,
        stddev,
        p5,
        p25,
        p50,
        p75,
        p95,
        min,
        max,
        sensitivities,
    })
}

/// Test-side encoder for optimal solve responses (used by fakes).
pub fn encode_solve_response(result: &SolveResult) -> Vec<u8> {
    let mut body = vec![STATUS_OPTIMAL];
    for v in [result.profit, result.tons, result.vessels, result.cost, result.eff_barge] {
        body.extend_from_slice(&v.to_le_bytes());
    }
    for list in [
        &result.route_tons,
        &result.route_profits,
        &result.margins,
        &result.transits,
        &result.shadow_prices,
    ] {
        for v in list.iter() {
            body.extend_from_slice(&v.to_le_bytes());
        }
    }
    body
}

/// Test-side encoders for the other response statuses.
pub fn encode_infeasible_response() -> Vec<u8> {
    vec![STATUS_INFEASIBLE]
}

pub fn encode_error_response(message: &str) -> Vec<u8> {
    let mut body = vec![STATUS_ERROR];
    body.extend_from_slice(message.as_bytes());
    body
}

pub fn encode_monte_carlo_response(result: &MonteCarloResult) -> Vec<u8> {
    let mut body = vec![STATUS_OPTIMAL];
    body.extend_from_slice(&result.n_scenarios.to_le_bytes());
    body.extend_from_slice(&result.n_feasible.to_le_bytes());
    body.extend_from_slice(&result.n_infeasible.to_le_bytes());
    for v in [
        result.mean,
        result.stddev,
        result.p5,
        result.p25,
        result.p50,
        result.p75,
        result.p95,
        result.min,
        result.max,
        0.0, // reserved
    ] {
        body.extend_from_slice(&v.to_le_bytes());
    }
    for v in &result.sensitivities {
        body.extend_from_slice(&v.to_le_bytes());
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> SolverInput {
        SolverInput {
            variables: vec![
                ("inv_don".to_string(), 5_000.0),
                ("buy_price_usd_ton".to_string(), 335.0),
            ],
            route_count: 2,
            constraint_count: 3,
        }
    }

    #[test]
    fn test_encode_solve_request_layout() {
        let body = encode_request(SolveMode::Solve, &input());
        assert_eq!(body[0], CMD_SOLVE);
        // Variable count.
        assert_eq!(u32::from_le_bytes(body[1..5].try_into().unwrap()), 2);
        // First name length + name.
        assert_eq!(u16::from_le_bytes(body[5..7].try_into().unwrap()), 7);
        assert_eq!(&body[7..14], b"inv_don");
        // Tail: two f64 values little-endian.
        let tail = &body[body.len() - 16..];
        assert_eq!(
            f64::from_le_bytes(tail[..8].try_into().unwrap()),
            5_000.0
        );
        assert_eq!(
            f64::from_le_bytes(tail[8..].try_into().unwrap()),
            335.0
        );
    }

    #[test]
    fn test_encode_monte_carlo_request_carries_scenarios() {
        let body = encode_request(SolveMode::MonteCarlo { n_scenarios: 500 }, &input());
        assert_eq!(body[0], CMD_MONTE_CARLO);
        assert_eq!(u32::from_le_bytes(body[1..5].try_into().unwrap()), 500);
    }

    #[test]
    fn test_solve_response_round_trip() {
        let result = SolveResult {
            profit: 1_250_000.0,
            tons: 40_000.0,
            vessels: 2.0,
            cost: 900_000.0,
            eff_barge: 0.85,
            route_tons: vec![25_000.0, 15_000.0],
            route_profits: vec![800_000.0, 450_000.0],
            margins: vec![32.0, 30.0],
            transits: vec![12.0, 9.0],
            shadow_prices: vec![1.5, 0.0, -2.25],
        };
        let body = encode_solve_response(&result);
        let decoded = decode_response(&body, SolveMode::Solve, &input()).unwrap();
        assert_eq!(decoded, SolverResponse::Optimal(result));
    }

    #[test]
    fn test_monte_carlo_response_round_trip() {
        let result = MonteCarloResult {
            n_scenarios: 500,
            n_feasible: 480,
            n_infeasible: 20,
            mean: 1_000_000.0,
            stddev: 120_000.0,
            p5: 810_000.0,
            p25: 920_000.0,
            p50: 1_005_000.0,
            p75: 1_080_000.0,
            p95: 1_190_000.0,
            min: 650_000.0,
            max: 1_400_000.0,
            sensitivities: vec![0.8, -0.3],
        };
        let body = encode_monte_carlo_response(&result);
        let decoded =
            decode_response(&body, SolveMode::MonteCarlo { n_scenarios: 500 }, &input()).unwrap();
        assert_eq!(decoded, SolverResponse::MonteCarlo(result));
    }

    #[test]
    fn test_infeasible_and_error_statuses() {
        let decoded =
            decode_response(&encode_infeasible_response(), SolveMode::Solve, &input()).unwrap();
        assert_eq!(decoded, SolverResponse::Infeasible);

        let err = decode_response(
            &encode_error_response("pivot failure"),
            SolveMode::Solve,
            &input(),
        )
        .unwrap_err();
        match err {
            SolverError::Engine(message) => assert_eq!(message, "pivot failure"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_payload_is_protocol_error() {
        let mut body = encode_solve_response(&SolveResult {
            profit: 1.0,
            tons: 2.0,
            vessels: 3.0,
            cost: 4.0,
            eff_barge: 5.0,
            route_tons: vec![0.0; 2],
            route_profits: vec![0.0; 2],
            margins: vec![0.0; 2],
            transits: vec![0.0; 2],
            shadow_prices: vec![0.0; 3],
        });
        body.truncate(body.len() - 4);
        let err = decode_response(&body, SolveMode::Solve, &input()).unwrap_err();
        assert!(matches!(err, SolverError::Protocol(_)));
    }
}
