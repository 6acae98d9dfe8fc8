use crate::models::Troolean;

/// 外部断言求值器
pub trait Condition: Send + Sync {
    fn evaluate(&self) -> Troolean;
}

impl<F> Condition for F
where
    F: Fn() -> Troolean + Send + Sync,
{
    fn evaluate(&self) -> Troolean {
        self()
    }
}
