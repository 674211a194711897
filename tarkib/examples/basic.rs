//! Basic example of the Tarkib IoC container.

use std::sync::Arc;

use parking_lot::RwLock;
use tarkib_container::definition::ComponentDefinition;
use tarkib_container::error::Result;
use tarkib_container::factory::ComponentFactory;
use tarkib_container::registry::{ComponentType, ParamSpec};
use tarkib_container::scope::Scope;
use tarkib_container::value::{ArgumentValue, ValueSpec};

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

struct Database {
    url: String,
    logger: Arc<dyn Logger>,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        self.logger.log(&format!("Executing: {sql}"));
        format!("Results from {}", self.url)
    }
}

struct UserRepository {
    db: RwLock<Option<Arc<Database>>>,
}

impl UserRepository {
    fn find_user(&self, id: u64) -> String {
        match self.db.read().clone() {
            Some(db) => db.query(&format!("SELECT * FROM users WHERE id = {id}")),
            None => "no database wired".to_string(),
        }
    }
}

struct UserService {
    repo: Arc<UserRepository>,
    logger: Arc<dyn Logger>,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        self.logger.log(&format!("Getting user {id}"));
        self.repo.find_user(id)
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter("tarkib=debug")
        .init();

    let factory = ComponentFactory::new();

    // === Register the types the container can build ===
    factory.register_type(
        ComponentType::builder::<ConsoleLogger>("ConsoleLogger")
            .constructor(vec![], |_| Ok(ConsoleLogger))
            .view(|logger| logger as Arc<dyn Logger>)
            .build(),
    )?;
    factory.register_type(
        ComponentType::builder::<Database>("Database")
            .constructor(
                vec![
                    ParamSpec::str_("url"),
                    ParamSpec::object::<Arc<dyn Logger>>("logger"),
                ],
                |args| {
                    Ok(Database {
                        url: args.str_(0)?,
                        logger: args.shared::<Arc<dyn Logger>>(1)?,
                    })
                },
            )
            .destroy(|db| {
                println!("closing database {}", db.url);
                Ok(())
            })
            .build(),
    )?;
    factory.register_type(
        ComponentType::builder::<UserRepository>("UserRepository")
            .constructor(vec![], |_| Ok(UserRepository { db: RwLock::new(None) }))
            .setter("db", ParamSpec::object::<Database>("db"), |repo, value| {
                *repo.db.write() = value.downcast::<Database>();
                Ok(())
            })
            .build(),
    )?;
    factory.register_type(
        ComponentType::builder::<UserService>("UserService")
            .constructor(
                vec![
                    ParamSpec::object::<UserRepository>("userRepository"),
                    ParamSpec::object::<Arc<dyn Logger>>("logger"),
                ],
                |args| {
                    Ok(UserService {
                        repo: args.object(0)?,
                        logger: args.shared::<Arc<dyn Logger>>(1)?,
                    })
                },
            )
            .build(),
    )?;

    // === Register the definitions describing the object graph ===
    factory.add_embedded_value_resolver(|s| Some(s.replace("${db.host}", "localhost")));

    factory.register_definition("logger", ComponentDefinition::for_class("ConsoleLogger"))?;
    factory.register_definition(
        "database",
        ComponentDefinition::for_class("Database")
            .with_depends_on(vec!["logger"])
            .with_ctor_arg(ArgumentValue::new(ValueSpec::placeholder(
                "postgres://${db.host}/myapp",
            )))
            .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("logger"))),
    )?;
    factory.register_definition(
        "userRepository",
        ComponentDefinition::for_class("UserRepository")
            .with_property("db", ValueSpec::reference("database")),
    )?;
    // UserService is a prototype: a fresh instance per request.
    factory.register_definition(
        "userService",
        ComponentDefinition::for_class("UserService")
            .with_scope(Scope::Prototype)
            .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("userRepository")))
            .with_ctor_arg(ArgumentValue::new(ValueSpec::reference("logger"))),
    )?;
    factory.register_alias("userService", "users")?;

    factory.pre_instantiate_singletons()?;
    println!("container ready: {factory:?}");

    let service: Arc<UserService> = factory.get_as("users")?;
    println!("{}", service.get_user(42));

    let service_again: Arc<UserService> = factory.get_as("userService")?;
    println!("{}", service_again.get_user(7));

    // Ordered teardown: dependents before their dependencies.
    factory.destroy_all();
    Ok(())
}
