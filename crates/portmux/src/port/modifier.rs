// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Holder for a port's optional input and output modifiers.
//!
//! Each side has its own mutex so a slow output filter never delays
//! inbound traffic. Attaching replaces whatever was attached before;
//! both sides start empty.

use crate::bottle::Property;
use crate::carrier::PortModifier;
use parking_lot::Mutex;

#[derive(Default)]
pub(crate) struct ModifierHolder {
    input: Mutex<Option<Box<dyn PortModifier>>>,
    output: Mutex<Option<Box<dyn PortModifier>>>,
}

impl ModifierHolder {
    fn side(&self, output: bool) -> &Mutex<Option<Box<dyn PortModifier>>> {
        if output {
            &self.output
        } else {
            &self.input
        }
    }

    /// Install a modifier, dropping any previous one on that side.
    pub fn attach(&self, output: bool, modifier: Box<dyn PortModifier>) {
        *self.side(output).lock() = Some(modifier);
    }

    /// Remove the modifier on one side.
    pub fn detach(&self, output: bool) {
        *self.side(output).lock() = None;
    }

    /// Run a payload through one side's modifier. Returns false when
    /// the modifier vetoes the message.
    pub fn apply(&self, output: bool, payload: &mut Vec<u8>) -> bool {
        let mut guard = self.side(output).lock();
        match guard.as_mut() {
            Some(modifier) => {
                if !modifier.accept(payload) {
                    return false;
                }
                modifier.modify(payload);
                true
            }
            None => true,
        }
    }

    /// Update parameters on one side's modifier.
    pub fn set_params(&self, output: bool, params: &Property) -> Result<(), String> {
        let mut guard = self.side(output).lock();
        match guard.as_mut() {
            Some(modifier) => {
                modifier.set_params(params);
                Ok(())
            }
            None => Err(side_missing(output)),
        }
    }

    /// Read parameters from one side's modifier.
    pub fn params(&self, output: bool) -> Result<Property, String> {
        let guard = self.side(output).lock();
        match guard.as_ref() {
            Some(modifier) => Ok(modifier.params()),
            None => Err(side_missing(output)),
        }
    }
}

fn side_missing(output: bool) -> String {
    if output {
        "No port modifier is attached to the output".to_string()
    } else {
        "No port modifier is attached to the input".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drops payloads starting with a marker byte and uppercases the
    /// rest.
    struct TestModifier {
        veto_marker: u8,
        config: Property,
    }

    impl PortModifier for TestModifier {
        fn accept(&mut self, payload: &[u8]) -> bool {
            payload.first() != Some(&self.veto_marker)
        }
        fn modify(&mut self, payload: &mut Vec<u8>) {
            payload.make_ascii_uppercase();
        }
        fn set_params(&mut self, params: &Property) {
            self.config = params.clone();
        }
        fn params(&self) -> Property {
            self.config.clone()
        }
    }

    fn holder_with_output_modifier() -> ModifierHolder {
        let holder = ModifierHolder::default();
        holder.attach(
            true,
            Box::new(TestModifier {
                veto_marker: b'!',
                config: Property::new(),
            }),
        );
        holder
    }

    #[test]
    fn test_empty_sides_pass_through() {
        let holder = ModifierHolder::default();
        let mut payload = b"unchanged".to_vec();
        assert!(holder.apply(true, &mut payload));
        assert!(holder.apply(false, &mut payload));
        assert_eq!(payload, b"unchanged");
    }

    #[test]
    fn test_veto_and_mutate() {
        let holder = holder_with_output_modifier();

        let mut vetoed = b"!drop me".to_vec();
        assert!(!holder.apply(true, &mut vetoed));

        let mut passed = b"keep".to_vec();
        assert!(holder.apply(true, &mut passed));
        assert_eq!(passed, b"KEEP");

        // Input side stays empty and untouched.
        let mut input = b"!in".to_vec();
        assert!(holder.apply(false, &mut input));
        assert_eq!(input, b"!in");
    }

    #[test]
    fn test_params_require_attachment() {
        let holder = holder_with_output_modifier();
        assert!(holder.params(true).is_ok());
        assert!(holder.params(false).is_err());

        let mut config = Property::new();
        config.put_str("file", "log.txt");
        assert!(holder.set_params(true, &config).is_ok());
        assert_eq!(holder.params(true).unwrap().find("file").as_str(), "log.txt");
        assert!(holder.set_params(false, &config).is_err());
    }

    #[test]
    fn test_detach_and_replace() {
        let holder = holder_with_output_modifier();
        holder.detach(true);
        let mut payload = b"!would have been vetoed".to_vec();
        assert!(holder.apply(true, &mut payload));

        holder.attach(
            true,
            Box::new(TestModifier {
                veto_marker: b'?',
                config: Property::new(),
            }),
        );
        let mut payload = b"?vetoed by replacement".to_vec();
        assert!(!holder.apply(true, &mut payload));
    }
}
