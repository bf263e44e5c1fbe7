//! Line protocol spoken by the sa-solver subprocess.
//!
//! The solver emits newline-terminated ASCII lines on stdout in three
//! shapes (solution, status, free-form message) and accepts one job per
//! line on stdin. This module parses the former and formats the latter.

use crate::job::WorkUnit;

/// Banner the solver prints once after entering mining mode.
pub const BANNER: &str = "SILENTARMY mining mode ready";

/// One parsed line of solver stdout.
///
/// Shapes are matched in this priority order; anything that fails both
/// patterns falls through to `Msg`.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverLine {
    /// A found solution, forwarded verbatim as a share submission
    Sol(Solution),

    /// Cumulative counters since solver start
    Status {
        /// Solutions found
        nr_sols: u64,
        /// Solutions that also met the share target
        nr_shares: u64,
    },

    /// Anything else, logged at high verbosity
    Msg(String),
}

/// Tokens of a `sol:` line, kept as the exact strings the solver emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Job the solution is for
    pub job_id: String,

    /// nTime used, 8 hex digits
    pub ntime: String,

    /// Solver-chosen right part of the nonce, hex
    pub nonce_rightpart: String,

    /// Encoded Equihash solution, hex
    pub sol: String,
}

/// Parse one solver stdout line.
pub fn parse(line: &str) -> SolverLine {
    if let Some(rest) = strip_prefix_ci(line, "sol:") {
        if let Some(solution) = parse_sol(rest) {
            return SolverLine::Sol(solution);
        }
    }

    if let Some(rest) = strip_prefix_ci(line, "status:") {
        if let Some((nr_sols, nr_shares)) = parse_status(rest) {
            return SolverLine::Status { nr_sols, nr_shares };
        }
    }

    SolverLine::Msg(line.to_string())
}

/// Format the job line a [`WorkUnit`] dispatches to a solver.
///
/// Four space-separated lowercase hex tokens: target, job id, header
/// prefix, nonce left part. Nothing is validated beyond hex encoding.
pub fn job_line(work: &WorkUnit) -> String {
    format!(
        "{} {} {} {}\n",
        hex::encode(work.target),
        work.job_id,
        hex::encode(&work.header),
        hex::encode(&work.nonce_left),
    )
}

/// `sol: <job_id> <ntime:8-hex> <nonce_rightpart:hex> <sol:hex>`
fn parse_sol(rest: &str) -> Option<Solution> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let [job_id, ntime, nonce_rightpart, sol] = tokens[..] else {
        return None;
    };

    if ntime.len() != 8 || !is_hex(ntime) {
        return None;
    }
    if !is_hex(nonce_rightpart) || !is_hex(sol) {
        return None;
    }

    Some(Solution {
        job_id: job_id.to_string(),
        ntime: ntime.to_string(),
        nonce_rightpart: nonce_rightpart.to_string(),
        sol: sol.to_string(),
    })
}

/// `status: <nr_sols:int> <nr_shares:int>`
fn parse_status(rest: &str) -> Option<(u64, u64)> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let [nr_sols, nr_shares] = tokens[..] else {
        return None;
    };

    Some((nr_sols.parse().ok()?, nr_shares.parse().ok()?))
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sol_line() {
        let line = "sol: job1 5a000000 deadbeef0011 aabbccdd";
        assert_eq!(
            parse(line),
            SolverLine::Sol(Solution {
                job_id: "job1".to_string(),
                ntime: "5a000000".to_string(),
                nonce_rightpart: "deadbeef0011".to_string(),
                sol: "aabbccdd".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert!(matches!(
            parse("SOL: job1 5a000000 de aa"),
            SolverLine::Sol(_)
        ));
        assert!(matches!(
            parse("Status: 10 2"),
            SolverLine::Status {
                nr_sols: 10,
                nr_shares: 2
            }
        ));
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse("status: 123 45"),
            SolverLine::Status {
                nr_sols: 123,
                nr_shares: 45
            }
        );
    }

    #[test]
    fn test_malformed_lines_fall_through_to_msg() {
        // Wrong ntime width
        assert!(matches!(
            parse("sol: job1 5a00 de aa"),
            SolverLine::Msg(_)
        ));
        // Non-hex solution
        assert!(matches!(
            parse("sol: job1 5a000000 de zz"),
            SolverLine::Msg(_)
        ));
        // Status with a missing counter
        assert!(matches!(parse("status: 123"), SolverLine::Msg(_)));
        // Plain chatter
        assert_eq!(
            parse("Devices ready"),
            SolverLine::Msg("Devices ready".to_string())
        );
    }

    #[test]
    fn test_job_line_tokens() {
        let work = WorkUnit {
            job_id: "Job1".to_string(),
            header: vec![0xAB; 108],
            nonce_left: vec![0x0A],
            target: [0xFF; 32],
        };

        let line = job_line(&work);
        assert!(line.ends_with('\n'));

        let tokens: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0], "ff".repeat(32));
        assert_eq!(tokens[1], "Job1");
        assert_eq!(tokens[2], "ab".repeat(108));
        assert_eq!(tokens[3], "0a");
    }
}
