use crate::stage::{Capability, Outcome, Stage};
use std::marker::PhantomData;

/// A producer-consumer that transforms each payload
pub struct MapStage<In, Out, F>
where
    F: FnMut(In) -> Out + Send + 'static,
{
    name: String,
    mapper: F,
    _types: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> MapStage<In, Out, F>
where
    F: FnMut(In) -> Out + Send + 'static,
{
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
            _types: PhantomData,
        }
    }
}

impl<In, Out, F> Stage for MapStage<In, Out, F>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Out + Send + 'static,
{
    type In = In;
    type Out = Out;

    const CAPABILITY: Capability = Capability::ProducerConsumer;

    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, input: In) -> Outcome<Out> {
        Outcome::Emit((self.mapper)(input))
    }
}

/// A producer-consumer that forwards payloads matching a predicate.
///
/// Rejected payloads are acknowledged as successful without output.
pub struct FilterStage<T, F>
where
    F: Fn(&T) -> bool + Send + 'static,
{
    name: String,
    predicate: F,
    _payload: PhantomData<fn(T)>,
}

impl<T, F> FilterStage<T, F>
where
    F: Fn(&T) -> bool + Send + 'static,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
            _payload: PhantomData,
        }
    }
}

impl<T, F> Stage for FilterStage<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    type In = T;
    type Out = T;

    const CAPABILITY: Capability = Capability::ProducerConsumer;

    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, input: T) -> Outcome<T> {
        if (self.predicate)(&input) {
            Outcome::Emit(input)
        } else {
            Outcome::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_stage() {
        let mut stage = FilterStage::new("even", |value: &i32| value % 2 == 0);
        assert_eq!(stage.transform(3), Outcome::Skip);
        assert_eq!(stage.transform(4), Outcome::Emit(4));
    }

    #[test]
    fn test_map_stage() {
        let mut stage = MapStage::new("double", |value: i32| value * 2);
        assert_eq!(stage.transform(5), Outcome::Emit(10));
        assert_eq!(stage.name(), "double");
    }

    #[test]
    fn test_map_stage_can_change_type() {
        let mut stage = MapStage::new("render", |value: u8| format!("v{}", value));
        assert_eq!(stage.transform(7), Outcome::Emit("v7".to_string()));
    }
}
