//! Solver port: framed binary protocol to the external LP engine.
//!
//! # Wire format
//!
//! Frames are length-prefixed: `[LEN:4 big-endian][BODY:LEN]`.
//! Request body is `cmd_byte || payload`; response body is
//! `status_byte || payload`.
//!
//! - `cmd=1` solve: model descriptor, then the variables block as
//!   little-endian IEEE-754 f64 in descriptor order.
//! - `cmd=2` monte_carlo: `n_scenarios` as u32-LE, then descriptor and
//!   variables block.
//! - status `0` optimal, `1` infeasible, `2` error (payload = UTF-8
//!   message).
//!
//! The model descriptor names the variables and carries the route and
//! constraint counts: `[VAR_COUNT:4 LE]` then per variable
//! `[NAME_LEN:2 LE][NAME]`, then `[ROUTE_COUNT:4 LE][CONSTRAINT_COUNT:4 LE]`.
//!
//! One outstanding command per product group; solves are never retried.

mod codec;
mod port;

pub use codec::{
    decode_response, encode_error_response, encode_infeasible_response,
    encode_monte_carlo_response, encode_request, encode_solve_response, MonteCarloResult,
    SolveMode, SolveResult, SolverInput, SolverResponse,
};
pub use port::{SolverError, SolverPort, SolverTimeouts};
