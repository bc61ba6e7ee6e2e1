//! Замер времени и форматирование размеров

use std::time::{Duration, Instant};

/// Выполняет `f` и возвращает её результат вместе с затраченным временем
pub fn measure_time<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed())
}

/// Байты в целых мебибайтах, с округлением вниз
pub fn mebibytes(bytes: u64) -> u64 {
    bytes >> 20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_time_returns_closure_value() {
        let (value, elapsed) = measure_time(|| 2 + 2);
        assert_eq!(value, 4);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn mebibytes_round_down() {
        assert_eq!(mebibytes(1 << 30), 1024);
        assert_eq!(mebibytes((1 << 20) - 1), 0);
    }
}
