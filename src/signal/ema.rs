use super::Momentum;
use crate::errors::SignalError;

/// Exponentially weighted moving average over `prices` (oldest first).
///
/// ema[0] = price[0]
/// ema[i] = alpha * price[i] + (1 - alpha) * ema[i-1],  alpha = 2 / (span + 1)
///
/// One output per input. Empty input gives an empty series.
pub fn ema_series<'a, I>(prices: I, span: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a f64>,
{
    let alpha = 2.0 / (span as f64 + 1.0);
    let iter = prices.into_iter();
    let mut out: Vec<f64> = Vec::with_capacity(iter.size_hint().0);
    for &p in iter {
        let next = match out.last() {
            None => p,
            // same recurrence; exact when p == e, so flat input stays flat
            Some(&e) => e + alpha * (p - e),
        };
        out.push(next);
    }
    out
}

/// Fast/slow EMA crossover direction from the final values of both averages.
///
/// # Panics
/// `fast_span` must be strictly less than `slow_span`. Passing them the other
/// way round is a caller bug; config loading rejects it before it gets here.
pub fn ema_crossover_signal<'a, I>(
    prices: I,
    fast_span: usize,
    slow_span: usize,
) -> Result<Momentum, SignalError>
where
    I: IntoIterator<Item = &'a f64>,
    I::IntoIter: Clone,
{
    assert!(
        fast_span < slow_span,
        "fast span {fast_span} must be below slow span {slow_span}"
    );

    let iter = prices.into_iter();
    let points = iter.clone().count();
    if points < 2 {
        return Err(SignalError::InsufficientData { points });
    }

    let fast = ema_series(iter.clone(), fast_span).last().copied();
    let slow = ema_series(iter, slow_span).last().copied();
    let (Some(fast), Some(slow)) = (fast, slow) else {
        return Err(SignalError::InsufficientData { points });
    };

    Ok(if fast > slow {
        Momentum::Bullish
    } else if fast < slow {
        Momentum::Bearish
    } else {
        Momentum::Neutral
    })
}
