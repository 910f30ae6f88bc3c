//! Controller-to-motor glue: the only path a control loop takes to reach
//! hardware.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::context::Ctx;
use crate::control::Controller;
use crate::device::motor::Motor;
use crate::error::CoreError;

/// Pairs a controller with a motor's registry key. Non-owning: the motor is
/// looked up on every command, so an actuator can be built before its motor
/// and holds no reference that would keep one alive.
pub struct ControlledActuator<M: Motor, C: Controller> {
    ctx: Ctx,
    motor_key: String,
    controller: RefCell<C>,
    _motor: PhantomData<M>,
}

impl<M: Motor, C: Controller> ControlledActuator<M, C> {
    pub fn new(ctx: Ctx, motor_key: impl Into<String>, controller: C) -> Self {
        Self {
            ctx,
            motor_key: motor_key.into(),
            controller: RefCell::new(controller),
            _motor: PhantomData,
        }
    }

    /// Feed `target` through the controller and command the motor with the
    /// regulated output. Fails only when the motor key resolves to nothing.
    pub fn set(&self, target: f32) -> Result<(), CoreError> {
        let mut controller = self.controller.borrow_mut();
        controller.update(target);
        let motor = self.ctx.get::<M>(&self.motor_key)?;
        motor.set(controller.output());
        Ok(())
    }

    /// Direct access for retuning or resetting the controller.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.controller.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::registry::{InitInfo, Keyed};
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeMotor {
        last: Cell<f32>,
    }

    impl Keyed for FakeMotor {
        type Key = String;

        fn describe(&self) -> String {
            "fake motor".into()
        }
    }

    impl Motor for FakeMotor {
        fn set(&self, target: f32) {
            self.last.set(target);
        }
    }

    struct FakeMotorInfo;

    impl InitInfo for FakeMotorInfo {
        type Owner = FakeMotor;

        fn key(&self) -> String {
            "m".into()
        }

        fn build(self, _ctx: &Ctx) -> Result<Rc<FakeMotor>, CoreError> {
            Ok(Rc::new(FakeMotor {
                last: Cell::new(0.0),
            }))
        }
    }

    struct Doubler(f32);

    impl Controller for Doubler {
        fn update(&mut self, input: f32) {
            self.0 = input * 2.0;
        }

        fn output(&self) -> f32 {
            self.0
        }
    }

    #[test]
    fn set_routes_through_controller_to_motor() {
        let ctx = Context::new();
        let motor = ctx.init(FakeMotorInfo).unwrap();

        let actuator =
            ControlledActuator::<FakeMotor, _>::new(ctx.clone(), "m", Doubler(0.0));
        actuator.set(3.0).unwrap();
        assert_eq!(motor.last.get(), 6.0);
    }

    #[test]
    fn missing_motor_surfaces_not_found() {
        let ctx = Context::new();
        let actuator =
            ControlledActuator::<FakeMotor, _>::new(ctx.clone(), "ghost", Doubler(0.0));
        assert!(matches!(
            actuator.set(1.0).unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }
}
