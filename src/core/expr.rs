//! Minimal address expressions: literals, registers and symbols joined by `+`/`-`.

/// Parse an address string (supports 0x prefix and decimal)
pub fn parse_address(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

/// Evaluate `expression`, resolving non-numeric terms through `resolve`
pub fn evaluate<F>(expression: &str, resolve: F) -> Result<u64, String>
where
    F: Fn(&str) -> Option<u64>,
{
    let expression = expression.trim();
    if expression.is_empty() {
        return Err("empty expression".into());
    }

    let mut total: u64 = 0;
    let mut negate = false;
    let mut term = String::new();

    let apply = |term: &str, negate: bool, total: &mut u64| -> Result<(), String> {
        let term = term.trim();
        if term.is_empty() {
            return Err(format!("missing operand in '{}'", expression));
        }
        let value = match parse_address(term) {
            Ok(v) => v,
            Err(_) => resolve(term).ok_or_else(|| format!("unknown identifier '{}'", term))?,
        };
        *total = if negate {
            total.wrapping_sub(value)
        } else {
            total.wrapping_add(value)
        };
        Ok(())
    };

    for c in expression.chars() {
        match c {
            '+' | '-' => {
                apply(&term, negate, &mut total)?;
                term.clear();
                negate = c == '-';
            }
            _ => term.push(c),
        }
    }
    apply(&term, negate, &mut total)?;

    Ok(total)
}
